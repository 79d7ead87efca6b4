//! The byte level vocabulary spoken with the actuator controller.
//!
//! Everything the host sends is a single byte. Position setup is the `3` byte
//! followed by three stepper distance codes, one per axis. The controller only
//! ever answers with whole lines, and the only line we act on is `TERM`.
//!
//! | Command                    | Byte        |
//! |----------------------------|-------------|
//! | start session              | `A`         |
//! | reject session             | `Y`         |
//! | present, left hand         | `1`         |
//! | present, right hand        | `2`         |
//! | enter position setup       | `3`         |
//! | present, both hands        | `4`         |
//! | stepper distance 0 to 20   | see [`STEPPER_CODES`] |

use crate::error::RigError;
use crate::profile::Hand;

/// Stepper distance codes, indexed by distance. 0-9 are literal digits, 10-15
/// are lowercase hex digits and 16-20 continue the alphabet.
pub const STEPPER_CODES: [u8; 21] = [
    b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', // 0-9
    b'a', b'b', b'c', b'd', b'e', b'f', // 10-15
    b'g', b'h', b'i', b'j', b'k', // 16-20
];

/// A difficulty distance that is known to fit in a single stepper code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepperDistance(u8);

impl StepperDistance {
    /// The largest distance that has a code.
    pub const MAX: u32 = 20;

    /// The raw distance value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// The character sent on the wire for this distance.
    pub fn code(self) -> char {
        STEPPER_CODES[self.0 as usize] as char
    }

    /// Look a wire character back up in the table.
    pub fn from_code(code: u8) -> Option<Self> {
        STEPPER_CODES
            .iter()
            .position(|&c| c == code)
            .map(|i| StepperDistance(i as u8))
    }
}

impl TryFrom<u32> for StepperDistance {
    type Error = RigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value <= Self::MAX {
            Ok(StepperDistance(value as u8))
        } else {
            Err(RigError::DistanceOutOfRange(value))
        }
    }
}

/// Every command the host can send to the actuator controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    /// An authorized animal is in the tube, begin a session.
    StartSession,
    /// The tag was not recognized.
    RejectSession,
    /// Raise a pellet for the given hand.
    Present(Hand),
    /// The next three bytes are stepper distance codes.
    PositionSetup,
    /// One stepper distance code, only meaningful after [`PositionSetup`](Self::PositionSetup).
    Distance(StepperDistance),
}

impl ActuatorCommand {
    /// The byte put on the wire for this command.
    pub fn encode(self) -> u8 {
        match self {
            ActuatorCommand::StartSession => b'A',
            ActuatorCommand::RejectSession => b'Y',
            ActuatorCommand::Present(Hand::Left) => b'1',
            ActuatorCommand::Present(Hand::Right) => b'2',
            ActuatorCommand::PositionSetup => b'3',
            ActuatorCommand::Present(Hand::Both) => b'4',
            ActuatorCommand::Distance(d) => STEPPER_CODES[d.value() as usize],
        }
    }

    /// Decode a single command byte. Digits `1`-`4` are read as commands, so
    /// distance codes are only recognized for the bytes that do not collide.
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            b'A' => Some(ActuatorCommand::StartSession),
            b'Y' => Some(ActuatorCommand::RejectSession),
            b'1' => Some(ActuatorCommand::Present(Hand::Left)),
            b'2' => Some(ActuatorCommand::Present(Hand::Right)),
            b'3' => Some(ActuatorCommand::PositionSetup),
            b'4' => Some(ActuatorCommand::Present(Hand::Both)),
            other => StepperDistance::from_code(other).map(ActuatorCommand::Distance),
        }
    }

    /// The full position setup frame for three difficulty values.
    pub fn position_setup(distances: [u32; 3]) -> Result<[ActuatorCommand; 4], RigError> {
        Ok([
            ActuatorCommand::PositionSetup,
            ActuatorCommand::Distance(distances[0].try_into()?),
            ActuatorCommand::Distance(distances[1].try_into()?),
            ActuatorCommand::Distance(distances[2].try_into()?),
        ])
    }
}

/// A line received from the actuator controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorReply {
    /// The IR beam reconnected, the animal has left the tube.
    Terminate,
    /// Anything else; logged and ignored.
    Other(String),
}

impl ActuatorReply {
    /// Classify one received line, trailing whitespace ignored.
    pub fn parse(line: &str) -> Self {
        match line.trim_end() {
            "TERM" => ActuatorReply::Terminate,
            other => ActuatorReply::Other(other.to_owned()),
        }
    }
}
