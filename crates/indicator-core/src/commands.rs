//! Commands sent from the host to the sensor board.
//!
//! Each command is one frame whose payload is the command tag, optionally
//! followed by a little-endian `u32` argument.

use indicator_types::PacketTag;

/// Largest command payload the board accepts, tag included.
pub const MAX_COMMAND_PAYLOAD: usize = 31;

/// A command for the sensor board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set the collection interval.
    CollectInterval(u32),
    /// Sound the buzzer for the given number of milliseconds.
    BeepOn(u32),
    BeepOff,
    Shutdown,
    PowerOn,
}

impl Command {
    /// The tag this command is sent with.
    #[must_use]
    pub fn tag(self) -> PacketTag {
        match self {
            Command::CollectInterval(_) => PacketTag::CollectInterval,
            Command::BeepOn(_) => PacketTag::BeepOn,
            Command::BeepOff => PacketTag::BeepOff,
            Command::Shutdown => PacketTag::Shutdown,
            Command::PowerOn => PacketTag::PowerOn,
        }
    }

    /// Frame payload for this command (before framing).
    #[must_use]
    pub fn to_payload(self) -> Vec<u8> {
        let mut payload = vec![self.tag().as_byte()];
        match self {
            Command::CollectInterval(arg) | Command::BeepOn(arg) => {
                payload.extend_from_slice(&arg.to_le_bytes());
            }
            Command::BeepOff | Command::Shutdown | Command::PowerOn => {}
        }
        debug_assert!(payload.len() <= MAX_COMMAND_PAYLOAD);
        payload
    }
}
