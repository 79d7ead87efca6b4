//! The error type shared by every part of the rig.

use std::{borrow::Cow, fmt, io, path::PathBuf, time::Duration};

/// Everything that can go wrong while talking to the hardware, the recorder,
/// or the profile tree on disk.
#[derive(Debug)]
pub enum RigError {
    /// Returned when a file, pipe, or serial port operation fails.
    Io(io::Error),

    /// Returned when the RON rig configuration cannot be deserialized.
    Config(ron::de::SpannedError),

    /// Returned when an animal record file does not have the expected shape.
    MalformedRecord {
        /// The record file that failed to parse.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Returned when a config value parses but makes no sense, e.g. a
    /// smoothing threshold larger than its window.
    InvalidConfig(String),

    /// Returned when the trial limit file does not contain five integers.
    MalformedLimits(String),

    /// Returned when a difficulty value has no single character stepper code.
    DistanceOutOfRange(u32),

    /// Returned when a suspension point waits longer than it is allowed to.
    Timeout {
        /// The thing we were waiting on.
        waiting_for: &'static str,
        /// How long we waited before giving up.
        after: Duration,
    },

    /// Returned when the recorder subprocess misbehaves or goes away.
    Recorder(String),

    /// Returned when the pellet classifier fails or prints something odd.
    Classifier(String),
}

impl fmt::Display for RigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RigError as RE;
        let msg = match self {
            RE::Io(error) => Cow::from(format!("io error: {}", error)),
            RE::Config(error) => Cow::from(format!("config error: {}", error)),
            RE::MalformedRecord { path, reason } => {
                Cow::from(format!("malformed record {}: {}", path.display(), reason))
            }
            RE::InvalidConfig(reason) => Cow::from(format!("invalid config: {}", reason)),
            RE::MalformedLimits(reason) => {
                Cow::from(format!("malformed trial limits: {}", reason))
            }
            RE::DistanceOutOfRange(d) => {
                Cow::from(format!("distance {} has no stepper code (0-20)", d))
            }
            RE::Timeout { waiting_for, after } => Cow::from(format!(
                "timed out after {:?} waiting for {}",
                after, waiting_for
            )),
            RE::Recorder(msg) => Cow::from(format!("recorder error: {}", msg)),
            RE::Classifier(msg) => Cow::from(format!("classifier error: {}", msg)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RigError {}

impl From<io::Error> for RigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ron::de::SpannedError> for RigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::Config(value)
    }
}
