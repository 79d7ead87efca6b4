//! Stand-ins for the hardware and the recorder, for unit tests.

use crate::detector::{Detection, PelletClassifier};
use crate::error::RigError;
use crate::recorder::{Recorder, RecorderLauncher};
use crate::serial_link::Port;

use std::{
    collections::VecDeque,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread::sleep,
    time::{Duration, Instant},
};

#[derive(Default)]
struct MockPortInner {
    input: VecDeque<u8>,
    scheduled: Vec<(Instant, Vec<u8>)>,
    written: Vec<u8>,
}

/// An in-memory serial port. Clones share the same buffers, so a test can
/// keep a handle while the code under test owns another.
#[derive(Clone, Default)]
pub struct MockPort {
    inner: Arc<Mutex<MockPortInner>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `bytes` readable right away.
    pub fn push_input(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().input.extend(bytes);
    }

    /// Make `bytes` readable once `delay` has passed.
    pub fn push_input_after(&self, delay: Duration, bytes: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .scheduled
            .push((Instant::now() + delay, bytes.to_vec()));
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().written.clone()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            let (due, later): (Vec<_>, Vec<_>) =
                inner.scheduled.drain(..).partition(|(at, _)| *at <= now);
            inner.scheduled = later;
            for (_, bytes) in due {
                inner.input.extend(bytes);
            }

            if !inner.input.is_empty() {
                let n = buf.len().min(inner.input.len());
                for (slot, byte) in buf.iter_mut().zip(inner.input.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        sleep(Duration::from_millis(1));
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn discard_input(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().input.clear();
        Ok(())
    }

    fn discard_output(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecorderStats {
    frames: usize,
    stale_removed: bool,
    stopped: bool,
}

/// A recorder that writes a frame file whenever one is requested.
pub struct ScriptedRecorder {
    frame_path: PathBuf,
    frame_bytes: Vec<u8>,
    stats: Arc<Mutex<RecorderStats>>,
}

impl ScriptedRecorder {
    pub fn new(frame_path: PathBuf) -> Self {
        Self {
            frame_path,
            frame_bytes: b"not really a jpeg".to_vec(),
            stats: Arc::default(),
        }
    }

    pub fn with_frame_bytes(self, frame_bytes: Vec<u8>) -> Self {
        Self {
            frame_bytes,
            ..self
        }
    }

    pub fn frames_requested(&self) -> usize {
        self.stats.lock().unwrap().frames
    }

    /// Whether the frame file was gone when the last frame was requested.
    pub fn saw_stale_frame_removed(&self) -> bool {
        self.stats.lock().unwrap().stale_removed
    }
}

impl Recorder for ScriptedRecorder {
    fn request_frame(&mut self, _timeout: Duration) -> Result<PathBuf, RigError> {
        let mut stats = self.stats.lock().unwrap();
        stats.frames += 1;
        stats.stale_removed = !self.frame_path.exists();
        fs::write(&self.frame_path, &self.frame_bytes)?;
        Ok(self.frame_path.clone())
    }

    fn stop(&mut self, _timeout: Duration) -> Result<(), RigError> {
        self.stats.lock().unwrap().stopped = true;
        Ok(())
    }
}

/// Launches [`ScriptedRecorder`]s and writes a fake video at the requested
/// path, the way a real recorder would.
#[derive(Clone)]
pub struct ScriptedLauncher {
    frame_path: PathBuf,
    stats: Arc<Mutex<RecorderStats>>,
    launched: Arc<Mutex<Vec<(PathBuf, bool)>>>,
}

impl ScriptedLauncher {
    pub fn new(frame_path: PathBuf) -> Self {
        Self {
            frame_path,
            stats: Arc::default(),
            launched: Arc::default(),
        }
    }

    /// Every `(video, test_mode)` launched so far.
    pub fn launched(&self) -> Vec<(PathBuf, bool)> {
        self.launched.lock().unwrap().clone()
    }

    pub fn frames_requested(&self) -> usize {
        self.stats.lock().unwrap().frames
    }

    pub fn stopped(&self) -> bool {
        self.stats.lock().unwrap().stopped
    }
}

impl RecorderLauncher for ScriptedLauncher {
    fn launch(&self, video: &Path, test_mode: bool) -> Result<Box<dyn Recorder>, RigError> {
        if let Some(dir) = video.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(video, b"fake video")?;
        self.launched
            .lock()
            .unwrap()
            .push((video.to_owned(), test_mode));

        Ok(Box::new(ScriptedRecorder {
            frame_path: self.frame_path.clone(),
            frame_bytes: b"not really a jpeg".to_vec(),
            stats: self.stats.clone(),
        }))
    }
}

/// A classifier that replays a fixed list of answers, repeating the last one
/// forever.
pub struct ScriptedClassifier {
    answers: VecDeque<Detection>,
    last: Detection,
}

impl ScriptedClassifier {
    pub fn new(answers: Vec<Detection>) -> Self {
        let last = answers.last().copied().unwrap_or(Detection::Present);
        Self {
            answers: answers.into(),
            last,
        }
    }
}

impl PelletClassifier for ScriptedClassifier {
    fn classify(&mut self, _image: &Path) -> Result<Detection, RigError> {
        Ok(self.answers.pop_front().unwrap_or(self.last))
    }
}
