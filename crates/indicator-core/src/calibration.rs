//! Gas sensor calibration.
//!
//! The GM-x02B gas sensors output a voltage that rises with concentration.
//! [`calibrate`] maps it onto a ppm(eq) estimate: a qualitative value, not a
//! certified measurement.

use indicator_types::Quantity;

/// Voltage at or below which the air is considered clean.
pub const BASELINE_VOLTAGE: f32 = 2.2;
/// Full-scale sensor voltage.
pub const MAX_VOLTAGE: f32 = 3.3;
/// Largest 10-bit ADC code.
pub const ADC_MAX: i32 = 1023;

/// Detection range of one gas channel, in ppm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasRange {
    pub ppm_min: f32,
    pub ppm_max: f32,
}

impl GasRange {
    pub const NO2: GasRange = GasRange::new(0.05, 10.0);
    pub const C2H5OH: GasRange = GasRange::new(10.0, 500.0);
    pub const VOC: GasRange = GasRange::new(1.0, 500.0);
    pub const CO: GasRange = GasRange::new(1.0, 1000.0);

    #[must_use]
    pub const fn new(ppm_min: f32, ppm_max: f32) -> Self {
        Self { ppm_min, ppm_max }
    }

    /// Range for a gas quantity, `None` for everything else.
    #[must_use]
    pub fn for_quantity(quantity: Quantity) -> Option<Self> {
        match quantity {
            Quantity::No2 => Some(Self::NO2),
            Quantity::C2h5oh => Some(Self::C2H5OH),
            Quantity::Voc => Some(Self::VOC),
            Quantity::Co => Some(Self::CO),
            _ => None,
        }
    }

    /// Calibrate a raw value against this range.
    #[must_use]
    pub fn calibrate(self, raw: f32) -> f32 {
        calibrate(raw, self.ppm_min, self.ppm_max)
    }
}

/// Convert a raw voltage or 10-bit ADC code into a sensor voltage.
///
/// Values above [`MAX_VOLTAGE`] are ADC codes: rounded, clamped to
/// `0..=1023` and scaled onto `[0, 3.3]`. Negative voltages clamp to zero.
#[must_use]
pub fn to_voltage(raw: f32) -> f32 {
    if raw > MAX_VOLTAGE {
        // `as` saturates, so huge inputs land on the clamp.
        let adc = ((raw + 0.5) as i32).clamp(0, ADC_MAX);
        (adc as f32 * MAX_VOLTAGE) / ADC_MAX as f32
    } else {
        raw.max(0.0)
    }
}

/// Map a raw gas reading onto a ppm(eq) value in `[0, ppm_max]`.
///
/// At or below the baseline the result is `0.0`. Above it the normalised
/// ratio is cubed before interpolating between `ppm_min` and `ppm_max`,
/// which keeps the estimate low for slightly elevated voltages.
///
/// # Examples
///
/// ```
/// use indicator_core::calibration::calibrate;
///
/// assert_eq!(calibrate(2.0, 0.05, 10.0), 0.0);
/// assert!((calibrate(3.3, 0.05, 10.0) - 10.0).abs() < 1e-4);
/// ```
#[must_use]
pub fn calibrate(raw: f32, ppm_min: f32, ppm_max: f32) -> f32 {
    let voltage = to_voltage(raw);
    if voltage <= BASELINE_VOLTAGE {
        return 0.0;
    }

    let ratio = ((voltage - BASELINE_VOLTAGE) / (MAX_VOLTAGE - BASELINE_VOLTAGE)).min(1.0);
    let ratio = ratio * ratio * ratio;
    let ppm = ppm_min + ratio * (ppm_max - ppm_min);

    ppm.clamp(0.0, ppm_max)
}
