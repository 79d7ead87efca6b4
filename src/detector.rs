//! Pellet detection: ask the recorder for a frame, run the classifier on it,
//! and smooth the answers over a short window.

use crate::config::CommandLine;
use crate::error::RigError;
use crate::recorder::Recorder;

use log::debug;
use std::{
    collections::VecDeque,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Command,
    thread::sleep,
    time::Duration,
};

/// What the classifier saw on the pellet stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// A pellet is sitting there.
    Present,
    /// No pellet, either it was taken or it fell off.
    Absent,
}

/// Something that can look at a frame and tell whether a pellet is in it.
pub trait PelletClassifier {
    /// Classify the image at `image`.
    fn classify(&mut self, image: &Path) -> Result<Detection, RigError>;
}

/// Runs an external classifier once per frame. The program gets the image
/// path through the `{image}` placeholder and prints `1` for no pellet, `0`
/// for a pellet.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    command: CommandLine,
}

impl CommandClassifier {
    /// Wrap a classifier command line.
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

impl PelletClassifier for CommandClassifier {
    fn classify(&mut self, image: &Path) -> Result<Detection, RigError> {
        let image = image.to_string_lossy().into_owned();
        let output = Command::new(&self.command.program)
            .args(self.command.expand(&[("image", image.as_str())]))
            .output()?;

        if !output.status.success() {
            return Err(RigError::Classifier(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.trim() {
            "1" => Ok(Detection::Absent),
            "0" => Ok(Detection::Present),
            other => Err(RigError::Classifier(format!("unexpected output {:?}", other))),
        }
    }
}

/// The bridge between the session loop, the recorder, and the classifier.
pub struct PelletDetector {
    classifier: Box<dyn PelletClassifier>,
    frame_path: PathBuf,
    timeout: Duration,
    pause: Duration,
}

impl PelletDetector {
    /// `frame_path` is removed before every request so a stale frame is never
    /// classified. `timeout` bounds the wait for the recorder, and `pause`
    /// is slept after every detection.
    pub fn new(
        classifier: Box<dyn PelletClassifier>,
        frame_path: impl Into<PathBuf>,
        timeout: Duration,
        pause: Duration,
    ) -> Self {
        Self {
            classifier,
            frame_path: frame_path.into(),
            timeout,
            pause,
        }
    }

    /// Have the recorder grab a frame and classify it.
    pub fn request_detection(&mut self, recorder: &mut dyn Recorder) -> Result<Detection, RigError> {
        match fs::remove_file(&self.frame_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let frame = recorder.request_frame(self.timeout)?;
        if fs::metadata(&frame)?.len() == 0 {
            return Err(RigError::Recorder(format!(
                "empty detection frame {}",
                frame.display()
            )));
        }

        let detection = self.classifier.classify(&frame)?;
        debug!("Detector says {:?}", detection);
        sleep(self.pause);
        Ok(detection)
    }
}

/// A rolling window of the most recent detections.
///
/// The window starts out full of [`Detection::Present`]. Once at least
/// `threshold` of the samples in it are [`Detection::Absent`] the arm should
/// come down for a new pellet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionWindow {
    samples: VecDeque<Detection>,
    threshold: usize,
}

impl DetectionWindow {
    /// A window of `size` samples.
    pub fn new(size: usize, threshold: usize) -> Self {
        Self {
            samples: VecDeque::from(vec![Detection::Present; size]),
            threshold,
        }
    }

    /// Push a new sample, dropping the oldest.
    pub fn push(&mut self, detection: Detection) {
        self.samples.pop_front();
        self.samples.push_back(detection);
    }

    /// Number of samples that saw no pellet.
    pub fn absences(&self) -> usize {
        self.samples
            .iter()
            .filter(|&&d| d == Detection::Absent)
            .count()
    }

    /// Whether the window alone calls for a new pellet.
    pub fn triggered(&self) -> bool {
        self.absences() >= self.threshold
    }

    /// Whether the arm should lower: the window is triggered, or the pellet
    /// has been up for `hard_limit` already.
    pub fn lower_arm(&self, since_presentation: Duration, hard_limit: Duration) -> bool {
        self.triggered() || since_presentation >= hard_limit
    }

    /// Forget every sample.
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|d| *d = Detection::Present);
    }

    /// The window as `1` for absent and `0` for present, oldest first.
    pub fn as_counts(&self) -> Vec<u8> {
        self.samples
            .iter()
            .map(|d| u8::from(*d == Detection::Absent))
            .collect()
    }
}
