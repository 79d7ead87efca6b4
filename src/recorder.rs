//! The video recorder runs as its own process. We talk to it with lines on
//! its stdin (`detect`, `stop`) and it answers every `detect` with a line on
//! its stdout once the detection frame has been written completely:
//!
//! ```text
//! frame                      (frame is at the configured path)
//! frame /some/other/path.jpg
//! ```
//!
//! Anything else the recorder prints is logged. A reader thread owns the
//! recorder's stdout and forwards each line over a channel, so every wait on
//! the recorder can time out.

use crate::config::CommandLine;
use crate::error::RigError;

use log::{debug, info, warn};
use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread::{self, sleep, JoinHandle},
    time::{Duration, Instant},
};

/// A running recorder.
pub trait Recorder {
    /// Ask for a detection frame and wait until it is ready.
    fn request_frame(&mut self, timeout: Duration) -> Result<PathBuf, RigError>;

    /// Stop recording and wait for the recorder to let go of the video.
    fn stop(&mut self, timeout: Duration) -> Result<(), RigError>;
}

/// Starts a recorder for one session.
pub trait RecorderLauncher {
    /// Start recording into `video`. Test tags put the recorder in test mode.
    fn launch(&self, video: &Path, test_mode: bool) -> Result<Box<dyn Recorder>, RigError>;
}

/// Launches the recorder as a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: CommandLine,
    frame_path: PathBuf,
}

impl ProcessLauncher {
    /// `command` may use the `{video}` and `{test}` placeholders. A bare
    /// `frame` reply refers to `frame_path`.
    pub fn new(command: CommandLine, frame_path: impl Into<PathBuf>) -> Self {
        Self {
            command,
            frame_path: frame_path.into(),
        }
    }
}

impl RecorderLauncher for ProcessLauncher {
    fn launch(&self, video: &Path, test_mode: bool) -> Result<Box<dyn Recorder>, RigError> {
        let video = video.to_string_lossy().into_owned();
        let test = if test_mode { "True" } else { "False" };
        let args = self.command.expand(&[("video", video.as_str()), ("test", test)]);
        debug!("Spawning recorder {} {:?}", self.command.program, args);

        let child = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        Ok(Box::new(ProcessRecorder::attach(child, self.frame_path.clone())?))
    }
}

/// A recorder subprocess and the thread reading its output.
pub struct ProcessRecorder {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    frame_path: PathBuf,
}

impl ProcessRecorder {
    /// Take over a child spawned with piped stdin and stdout.
    pub fn attach(mut child: Child, frame_path: PathBuf) -> Result<Self, RigError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RigError::Recorder("stdin is not piped".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RigError::Recorder("stdout is not piped".to_owned()))?;

        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Lost recorder output: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: rx,
            reader: Some(reader),
            frame_path,
        })
    }

    fn command(&mut self, cmd: &str) -> Result<(), RigError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RigError::Recorder("recorder already stopped".to_owned()))?;
        stdin.write_all(cmd.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        Ok(())
    }

    fn drain_output(&mut self) {
        while let Ok(line) = self.lines.try_recv() {
            info!("recorder: {}", line);
        }
    }
}

impl Recorder for ProcessRecorder {
    fn request_frame(&mut self, timeout: Duration) -> Result<PathBuf, RigError> {
        self.command("detect")?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => match line.trim().strip_prefix("frame") {
                    Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                        let rest = rest.trim();
                        return Ok(if rest.is_empty() {
                            self.frame_path.clone()
                        } else {
                            PathBuf::from(rest)
                        });
                    }
                    _ => debug!("recorder: {}", line),
                },
                Err(RecvTimeoutError::Timeout) => {
                    return Err(RigError::Timeout {
                        waiting_for: "a detection frame",
                        after: timeout,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RigError::Recorder("recorder closed its output".to_owned()))
                }
            }
        }
    }

    fn stop(&mut self, timeout: Duration) -> Result<(), RigError> {
        if let Err(e) = self.command("stop") {
            warn!("Could not send stop to recorder: {}", e);
        }
        // Closing stdin is the fallback stop signal.
        self.stdin = None;

        let deadline = Instant::now() + timeout;
        loop {
            self.drain_output();
            if let Some(status) = self.child.try_wait()? {
                debug!("Recorder exited with {}", status);
                break;
            }
            if Instant::now() >= deadline {
                self.child.kill()?;
                self.child.wait()?;
                return Err(RigError::Timeout {
                    waiting_for: "the recorder to exit",
                    after: timeout,
                });
            }
            sleep(Duration::from_millis(20));
        }

        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.drain_output();
        Ok(())
    }
}

impl Drop for ProcessRecorder {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("Recorder still running, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
