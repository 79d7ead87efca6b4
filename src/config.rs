//! Rig configuration, read from a RON file.
//!
//! Every field has a default, so a config file only needs to mention what it
//! changes:
//!
//! ```text
//! (
//!     actuator_port: Some("/dev/ttyUSB0"),
//!     rfid_port: Some("/dev/ttyUSB1"),
//!     mode: Smoothed(window: 3, threshold: 2),
//!     timings: (grace_ms: 6000),
//! )
//! ```

use crate::error::RigError;

use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

/// How the session loop decides when to present a new pellet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PresentationMode {
    /// Keep a rolling window of detector samples and re-present once at least
    /// `threshold` of the last `window` samples saw no pellet, or once the
    /// hard limit has passed since the last presentation.
    Smoothed {
        /// Number of samples kept.
        window: usize,
        /// Absent samples needed to re-present.
        threshold: usize,
    },
    /// Present on every cycle, then ask the detector once. A pellet that is
    /// gone by then counts as a successful trial.
    Cycling,
    /// No detector. Present with the hand-specific command on a fixed interval.
    HandTimed,
}

impl PresentationMode {
    /// Smoothed windows need `1 <= threshold <= window`; anything else
    /// either fires on every poll or never fires at all.
    pub fn validate(&self) -> Result<(), RigError> {
        match *self {
            PresentationMode::Smoothed { window, threshold }
                if threshold == 0 || threshold > window =>
            {
                Err(RigError::InvalidConfig(format!(
                    "smoothing threshold {} does not fit a window of {}",
                    threshold, window
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A subprocess command line. `{placeholders}` in `args` are substituted
/// before spawning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandLine {
    /// Program to run.
    pub program: String,
    /// Arguments, possibly with placeholders.
    pub args: Vec<String>,
}

impl CommandLine {
    /// The arguments with every `{key}` replaced by its value.
    pub fn expand(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{}}}", key), value)
                })
            })
            .collect()
    }
}

/// Every wait and sleep in the rig, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timings {
    /// After sending the start byte, before the session starts.
    pub settle_ms: u64,
    /// After position setup, before the first presentation.
    pub grace_ms: u64,
    /// Sleep between iterations of the polling loop.
    pub poll_ms: u64,
    /// Smoothed mode: minimum time after a presentation before sampling.
    pub detection_interval_ms: u64,
    /// Smoothed mode: re-present after this long no matter what.
    pub hard_limit_ms: u64,
    /// Cycling mode: wait between presenting and asking the detector.
    pub cycle_settle_ms: u64,
    /// Hand timed mode: interval between presentations.
    pub hand_interval_ms: u64,
    /// Hand timed and smoothed modes: pause after a presentation.
    pub after_present_ms: u64,
    /// Pause after every detection.
    pub after_detection_ms: u64,
    /// Longest wait for the recorder to hand over a frame.
    pub detection_timeout_ms: u64,
    /// Longest wait for the recorder to exit after `stop`.
    pub recorder_stop_timeout_ms: u64,
    /// Longest wait for the session video to be released.
    pub video_release_timeout_ms: u64,
    /// Longest wait for the actuator to finish a reply line.
    pub reply_timeout_ms: u64,
    /// Longest wait between the start and end of one RFID tag.
    pub tag_timeout_ms: u64,
    /// Serial port read timeout, the granularity of every port poll.
    pub port_read_timeout_ms: u64,
    /// End a session that never receives `TERM` after this long.
    pub max_session_ms: Option<u64>,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            grace_ms: 4000,
            poll_ms: 50,
            detection_interval_ms: 500,
            hard_limit_ms: 25_000,
            cycle_settle_ms: 4000,
            hand_interval_ms: 5000,
            after_present_ms: 500,
            after_detection_ms: 1000,
            detection_timeout_ms: 10_000,
            recorder_stop_timeout_ms: 30_000,
            video_release_timeout_ms: 60_000,
            reply_timeout_ms: 1000,
            tag_timeout_ms: 2000,
            port_read_timeout_ms: 10,
            max_session_ms: None,
        }
    }
}

macro_rules! duration_getters {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl Timings {
            $(
                #[allow(missing_docs)]
                pub fn $name(&self) -> Duration {
                    Duration::from_millis(self.$field)
                }
            )*

            /// The session length cap, if any.
            pub fn max_session(&self) -> Option<Duration> {
                self.max_session_ms.map(Duration::from_millis)
            }
        }
    };
}

duration_getters! {
    settle => settle_ms,
    grace => grace_ms,
    poll => poll_ms,
    detection_interval => detection_interval_ms,
    hard_limit => hard_limit_ms,
    cycle_settle => cycle_settle_ms,
    hand_interval => hand_interval_ms,
    after_present => after_present_ms,
    after_detection => after_detection_ms,
    detection_timeout => detection_timeout_ms,
    recorder_stop_timeout => recorder_stop_timeout_ms,
    video_release_timeout => video_release_timeout_ms,
    reply_timeout => reply_timeout_ms,
    tag_timeout => tag_timeout_ms,
    port_read_timeout => port_read_timeout_ms,
}

/// Everything needed to run the rig.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RigConfig {
    /// Root of the animal profile tree.
    pub profiles_dir: PathBuf,
    /// The five line daily trial limit file.
    pub trial_limits: PathBuf,
    /// Serial device of the actuator controller; prompted for if unset.
    pub actuator_port: Option<String>,
    /// Serial device of the RFID reader; prompted for if unset.
    pub rfid_port: Option<String>,
    /// Baud rate of both serial devices.
    pub baud_rate: u32,
    /// Tags are truncated to this many characters before lookup.
    pub tag_length: usize,
    /// Presentation strategy.
    pub mode: PresentationMode,
    /// Video recorder subprocess. Placeholders: `{video}`, `{test}`.
    pub recorder: CommandLine,
    /// Pellet classifier. Placeholder: `{image}`. Prints `1` when no pellet
    /// is visible and `0` when one is.
    pub classifier: CommandLine,
    /// Where the recorder drops detection frames.
    pub frame_path: PathBuf,
    /// A finished video is kept with probability `1 / retention_odds`.
    pub retention_odds: u32,
    /// Local hour at which the per-animal daily counts reset.
    pub daily_reset_hour: u32,
    /// Waits and sleeps.
    pub timings: Timings,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from("AnimalProfiles"),
            trial_limits: PathBuf::from("config/trialLimitConfig.txt"),
            actuator_port: None,
            rfid_port: None,
            baud_rate: 9600,
            tag_length: 12,
            mode: PresentationMode::HandTimed,
            recorder: CommandLine {
                program: "python".to_owned(),
                args: ["camera_driver.py", "--c", "0", "--p", "{video}", "--t", "{test}"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
            classifier: CommandLine {
                program: "python".to_owned(),
                args: vec!["detector.py".to_owned(), "{image}".to_owned()],
            },
            frame_path: PathBuf::from("detection_frame.jpg"),
            retention_odds: 4,
            daily_reset_hour: 7,
            timings: Timings::default(),
        }
    }
}

impl RigConfig {
    /// Parse a config from RON text.
    pub fn from_ron(text: &str) -> Result<Self, RigError> {
        let config: Self = ron::de::from_str(text)?;
        config.mode.validate()?;
        Ok(config)
    }

    /// Read the config at `path`, falling back to the defaults if there is no
    /// such file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
