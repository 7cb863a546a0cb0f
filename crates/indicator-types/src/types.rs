//! Core types for indicator sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Packet tag carried in byte 0 of every decoded frame on the sensor link.
///
/// Tags `0xA0..=0xA4` are commands sent to the sensor board, tags
/// `0xB0..=0xBE` are readings sent by it. Every reading carries a single
/// little-endian `f32` payload.
///
/// This enum is marked `#[non_exhaustive]` because the board firmware adds
/// tags over time; unknown tags must be ignored, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum PacketTag {
    /// Set the board's collection interval (u32 argument).
    CollectInterval = 0xA0,
    /// Turn the buzzer on (u32 argument, milliseconds).
    BeepOn = 0xA1,
    /// Turn the buzzer off.
    BeepOff = 0xA2,
    /// Power the sensor board down.
    Shutdown = 0xA3,
    /// Power the sensor board up.
    PowerOn = 0xA4,

    /// SCD41 temperature (°C).
    Scd41Temperature = 0xB0,
    /// SCD41 relative humidity (%).
    Scd41Humidity = 0xB1,
    /// SCD41 CO2 concentration (ppm).
    Co2 = 0xB2,
    /// SHT41 internal temperature (°C).
    Temperature = 0xB3,
    /// SHT41 internal relative humidity (%).
    Humidity = 0xB4,
    /// SGP40 TVOC index.
    TvocIndex = 0xB5,
    /// PM1.0 mass concentration (µg/m³).
    Pm1 = 0xB6,
    /// PM2.5 mass concentration (µg/m³).
    Pm25 = 0xB7,
    /// PM10 mass concentration (µg/m³).
    Pm10 = 0xB8,
    /// GM102B NO2 sensor, raw voltage or ADC code.
    No2Raw = 0xB9,
    /// GM302B ethanol sensor, raw voltage or ADC code.
    C2h5ohRaw = 0xBA,
    /// GM502B VOC sensor, raw voltage or ADC code.
    VocRaw = 0xBB,
    /// GM702B CO sensor, raw voltage or ADC code.
    CoRaw = 0xBC,
    /// External probe temperature (°C).
    ExternalTemperature = 0xBD,
    /// External probe relative humidity (%).
    ExternalHumidity = 0xBE,
}

impl PacketTag {
    /// All tags of the link protocol, in wire order.
    pub const ALL: [PacketTag; 20] = [
        PacketTag::CollectInterval,
        PacketTag::BeepOn,
        PacketTag::BeepOff,
        PacketTag::Shutdown,
        PacketTag::PowerOn,
        PacketTag::Scd41Temperature,
        PacketTag::Scd41Humidity,
        PacketTag::Co2,
        PacketTag::Temperature,
        PacketTag::Humidity,
        PacketTag::TvocIndex,
        PacketTag::Pm1,
        PacketTag::Pm25,
        PacketTag::Pm10,
        PacketTag::No2Raw,
        PacketTag::C2h5ohRaw,
        PacketTag::VocRaw,
        PacketTag::CoRaw,
        PacketTag::ExternalTemperature,
        PacketTag::ExternalHumidity,
    ];

    /// The raw tag byte.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether this tag is a command to the board rather than a reading.
    #[must_use]
    pub fn is_command(self) -> bool {
        (self as u8) < 0xB0
    }

    /// Whether the payload of this tag is a raw gas sensor value that must
    /// be calibrated before use.
    #[must_use]
    pub fn is_raw_gas(self) -> bool {
        matches!(
            self,
            PacketTag::No2Raw | PacketTag::C2h5ohRaw | PacketTag::VocRaw | PacketTag::CoRaw
        )
    }

    /// Short name used in log lines.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PacketTag::CollectInterval => "collect-interval",
            PacketTag::BeepOn => "beep-on",
            PacketTag::BeepOff => "beep-off",
            PacketTag::Shutdown => "shutdown",
            PacketTag::PowerOn => "power-on",
            PacketTag::Scd41Temperature => "SCD41 temp",
            PacketTag::Scd41Humidity => "SCD41 humidity",
            PacketTag::Co2 => "CO2",
            PacketTag::Temperature => "Temp",
            PacketTag::Humidity => "Humidity",
            PacketTag::TvocIndex => "TVOC",
            PacketTag::Pm1 => "PM1.0",
            PacketTag::Pm25 => "PM2.5",
            PacketTag::Pm10 => "PM10",
            PacketTag::No2Raw => "NO2",
            PacketTag::C2h5ohRaw => "C2H5OH",
            PacketTag::VocRaw => "VOC",
            PacketTag::CoRaw => "CO",
            PacketTag::ExternalTemperature => "Temp external",
            PacketTag::ExternalHumidity => "Humidity external",
        }
    }
}

impl TryFrom<u8> for PacketTag {
    type Error = ParseError;

    /// Convert a tag byte to a `PacketTag`.
    ///
    /// # Examples
    ///
    /// ```
    /// use indicator_types::PacketTag;
    ///
    /// assert_eq!(PacketTag::try_from(0xB2), Ok(PacketTag::Co2));
    /// assert!(PacketTag::try_from(0x42).is_err());
    /// ```
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PacketTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_byte() == value)
            .ok_or(ParseError::UnknownTag(value))
    }
}

impl fmt::Display for PacketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_byte())
    }
}

/// A quantity tracked by the appliance: aggregated, kept in history and
/// exported.
///
/// The declaration order is the persisted order of history datasets; do not
/// reorder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Quantity {
    /// Internal temperature (SHT41).
    Temperature,
    /// Internal relative humidity (SHT41).
    Humidity,
    /// CO2 concentration.
    Co2,
    /// TVOC index.
    Tvoc,
    /// External probe temperature.
    ExternalTemperature,
    /// External probe relative humidity.
    ExternalHumidity,
    /// PM1.0.
    Pm1,
    /// PM2.5.
    Pm25,
    /// PM10.
    Pm10,
    /// NO2 ppm(eq).
    No2,
    /// Ethanol ppm(eq).
    C2h5oh,
    /// VOC ppm(eq).
    Voc,
    /// CO ppm(eq).
    Co,
}

/// Number of tracked quantities.
pub const QUANTITY_COUNT: usize = 13;

impl Quantity {
    /// All tracked quantities in persisted order.
    pub const ALL: [Quantity; QUANTITY_COUNT] = [
        Quantity::Temperature,
        Quantity::Humidity,
        Quantity::Co2,
        Quantity::Tvoc,
        Quantity::ExternalTemperature,
        Quantity::ExternalHumidity,
        Quantity::Pm1,
        Quantity::Pm25,
        Quantity::Pm10,
        Quantity::No2,
        Quantity::C2h5oh,
        Quantity::Voc,
        Quantity::Co,
    ];

    /// Position of this quantity in [`Quantity::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The quantity fed by a packet tag, if that tag is tracked.
    ///
    /// SCD41 temperature and humidity are not tracked: the SHT41 is the
    /// authoritative internal climate sensor.
    #[must_use]
    pub fn from_tag(tag: PacketTag) -> Option<Self> {
        match tag {
            PacketTag::Co2 => Some(Quantity::Co2),
            PacketTag::Temperature => Some(Quantity::Temperature),
            PacketTag::Humidity => Some(Quantity::Humidity),
            PacketTag::TvocIndex => Some(Quantity::Tvoc),
            PacketTag::Pm1 => Some(Quantity::Pm1),
            PacketTag::Pm25 => Some(Quantity::Pm25),
            PacketTag::Pm10 => Some(Quantity::Pm10),
            PacketTag::No2Raw => Some(Quantity::No2),
            PacketTag::C2h5ohRaw => Some(Quantity::C2h5oh),
            PacketTag::VocRaw => Some(Quantity::Voc),
            PacketTag::CoRaw => Some(Quantity::Co),
            PacketTag::ExternalTemperature => Some(Quantity::ExternalTemperature),
            PacketTag::ExternalHumidity => Some(Quantity::ExternalHumidity),
            _ => None,
        }
    }

    /// Short label used in log lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Quantity::Temperature => "Temp",
            Quantity::Humidity => "Humidity",
            Quantity::Co2 => "CO2",
            Quantity::Tvoc => "TVOC",
            Quantity::ExternalTemperature => "TempExt",
            Quantity::ExternalHumidity => "HumExt",
            Quantity::Pm1 => "PM1.0",
            Quantity::Pm25 => "PM2.5",
            Quantity::Pm10 => "PM10",
            Quantity::No2 => "NO2",
            Quantity::C2h5oh => "C2H5OH",
            Quantity::Voc => "VOC",
            Quantity::Co => "CO",
        }
    }

    /// Unit of measure.
    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature | Quantity::ExternalTemperature => "°C",
            Quantity::Humidity | Quantity::ExternalHumidity => "%",
            Quantity::Co2 => "ppm",
            Quantity::Tvoc => "index",
            Quantity::Pm1 | Quantity::Pm25 | Quantity::Pm10 => "µg/m³",
            Quantity::No2 | Quantity::C2h5oh | Quantity::Voc | Quantity::Co => "ppm(eq)",
        }
    }

    /// Number of decimal places worth displaying.
    #[must_use]
    pub fn resolution(self) -> u8 {
        match self {
            Quantity::Humidity | Quantity::ExternalHumidity | Quantity::Co2 | Quantity::Tvoc => 0,
            Quantity::Temperature
            | Quantity::ExternalTemperature
            | Quantity::Pm1
            | Quantity::Pm25
            | Quantity::Pm10 => 1,
            Quantity::No2 | Quantity::C2h5oh | Quantity::Voc | Quantity::Co => 2,
        }
    }

    /// Column name in the export table. Also used as the API identifier.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Quantity::Temperature => "temp_internal",
            Quantity::Humidity => "humidity_internal",
            Quantity::Co2 => "co2",
            Quantity::Tvoc => "tvoc",
            Quantity::ExternalTemperature => "temp_external",
            Quantity::ExternalHumidity => "humidity_external",
            Quantity::Pm1 => "pm1_0",
            Quantity::Pm25 => "pm2_5",
            Quantity::Pm10 => "pm10",
            Quantity::No2 => "no2_ppm",
            Quantity::C2h5oh => "c2h5oh_ppm",
            Quantity::Voc => "voc_ppm",
            Quantity::Co => "co_ppm",
        }
    }

    /// Whether this quantity is a calibrated gas channel.
    #[must_use]
    pub fn is_gas(self) -> bool {
        matches!(
            self,
            Quantity::No2 | Quantity::C2h5oh | Quantity::Voc | Quantity::Co
        )
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Quantity {
    type Err = ParseError;

    /// Parse a quantity from its column name (case-insensitive).
    ///
    /// ```
    /// use indicator_types::Quantity;
    ///
    /// assert_eq!("co2".parse::<Quantity>(), Ok(Quantity::Co2));
    /// assert_eq!("PM2_5".parse::<Quantity>(), Ok(Quantity::Pm25));
    /// assert!("radon".parse::<Quantity>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Quantity::ALL
            .iter()
            .copied()
            .find(|q| q.column() == lower)
            .ok_or_else(|| ParseError::InvalidValue(format!("unknown quantity '{s}'")))
    }
}

/// Size of the float payload carried by every reading tag.
pub const READING_PAYLOAD_BYTES: usize = 4;

/// One typed sample decoded from a frame. Transient: consumed immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// The tag the sample arrived with.
    pub tag: PacketTag,
    /// The payload as sent by the board (uncalibrated).
    pub value: f32,
}

impl SensorReading {
    /// Parse the payload that followed `tag` in a frame.
    ///
    /// Bytes beyond the four-byte float are ignored.
    ///
    /// # Errors
    ///
    /// - [`ParseError::InsufficientBytes`] if the payload is shorter than
    ///   [`READING_PAYLOAD_BYTES`].
    /// - [`ParseError::NonFinite`] if the value is NaN or infinite.
    /// - [`ParseError::InvalidValue`] if `tag` is a command tag.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn parse(tag: PacketTag, payload: &[u8]) -> Result<Self, ParseError> {
        use bytes::Buf;

        if tag.is_command() {
            return Err(ParseError::InvalidValue(format!(
                "{tag} is a command, not a reading"
            )));
        }
        if payload.len() < READING_PAYLOAD_BYTES {
            return Err(ParseError::InsufficientBytes {
                expected: READING_PAYLOAD_BYTES,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        let value = buf.get_f32_le();
        if !value.is_finite() {
            return Err(ParseError::NonFinite { tag: tag.name() });
        }

        Ok(Self { tag, value })
    }
}

/// A calibrated gas channel together with the raw value it came from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GasReading {
    /// Calibrated ppm(eq).
    pub ppm: f32,
    /// Raw voltage or ADC code as sent by the board.
    pub raw: f32,
}

/// Latest value of every tracked quantity.
///
/// Quantities that have not reported yet read as `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CurrentSnapshot {
    pub temp_internal: f32,
    pub humidity_internal: f32,
    pub co2: f32,
    pub tvoc: f32,
    pub temp_external: f32,
    pub humidity_external: f32,
    pub pm1_0: f32,
    pub pm2_5: f32,
    pub pm10: f32,
    pub no2: GasReading,
    pub c2h5oh: GasReading,
    pub voc: GasReading,
    pub co: GasReading,
    /// When any field was last written.
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "time::serde::rfc3339::option")
    )]
    pub updated_at: Option<time::OffsetDateTime>,
}

impl CurrentSnapshot {
    /// Latest value of a quantity (ppm(eq) for gas channels).
    #[must_use]
    pub fn value(&self, quantity: Quantity) -> f32 {
        match quantity {
            Quantity::Temperature => self.temp_internal,
            Quantity::Humidity => self.humidity_internal,
            Quantity::Co2 => self.co2,
            Quantity::Tvoc => self.tvoc,
            Quantity::ExternalTemperature => self.temp_external,
            Quantity::ExternalHumidity => self.humidity_external,
            Quantity::Pm1 => self.pm1_0,
            Quantity::Pm25 => self.pm2_5,
            Quantity::Pm10 => self.pm10,
            Quantity::No2 => self.no2.ppm,
            Quantity::C2h5oh => self.c2h5oh.ppm,
            Quantity::Voc => self.voc.ppm,
            Quantity::Co => self.co.ppm,
        }
    }

    /// Record a new value. `raw` is kept for gas channels and ignored
    /// otherwise.
    pub fn record(&mut self, quantity: Quantity, value: f32, raw: f32) {
        let slot = match quantity {
            Quantity::Temperature => &mut self.temp_internal,
            Quantity::Humidity => &mut self.humidity_internal,
            Quantity::Co2 => &mut self.co2,
            Quantity::Tvoc => &mut self.tvoc,
            Quantity::ExternalTemperature => &mut self.temp_external,
            Quantity::ExternalHumidity => &mut self.humidity_external,
            Quantity::Pm1 => &mut self.pm1_0,
            Quantity::Pm25 => &mut self.pm2_5,
            Quantity::Pm10 => &mut self.pm10,
            Quantity::No2 => return self.no2 = GasReading { ppm: value, raw },
            Quantity::C2h5oh => return self.c2h5oh = GasReading { ppm: value, raw },
            Quantity::Voc => return self.voc = GasReading { ppm: value, raw },
            Quantity::Co => return self.co = GasReading { ppm: value, raw },
        };
        *slot = value;
    }
}
