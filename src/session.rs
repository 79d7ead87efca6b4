//! The session controller: everything that happens between an animal being
//! admitted and it leaving the tube.
//!
//! ```text
//!  Idle ──[run]──▶ Initializing ──[setup sent, grace over]──▶ Polling
//!    ▲                                                          │
//!    │                                    [TERM, timeout, cancel, failure]
//!    │                                                          ▼
//!    └─────────────[video settled, logs written]─────────── Finalizing
//! ```
//!
//! Initializing bumps the session count, starts the recorder into a temporary
//! video, and positions the steppers. Polling presents pellets according to the
//! [`PresentationMode`] until the actuator controller sends `TERM`. Finalizing
//! stops the recorder, keeps or deletes the video, appends the logs and saves
//! the profile.

use crate::command::{ActuatorCommand, ActuatorReply};
use crate::config::{PresentationMode, RigConfig, Timings};
use crate::detector::{Detection, DetectionWindow, PelletDetector};
use crate::error::RigError;
use crate::profile::{AnimalProfile, Hand};
use crate::recorder::{Recorder, RecorderLauncher};
use crate::serial_link::{Port, SerialLink};
use crate::session_log::{append_display_history, append_session_entry, SessionRecord};
use crate::video::{
    finalize_video, permanent_video_path, temp_video_path, wait_until_released, Retention,
    VideoOutcome,
};

use chrono::{DateTime, Local};
use log::{error, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

/// Where the controller is in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running.
    Idle,
    /// Starting the recorder and positioning the apparatus.
    Initializing,
    /// Presenting pellets and waiting for `TERM`.
    Polling,
    /// Stopping the recorder and writing everything down.
    Finalizing,
}

/// Why polling stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The actuator controller sent `TERM`.
    Signalled,
    /// The session ran past its maximum length.
    TimedOut,
    /// Someone pulled the [`CancelToken`].
    Cancelled,
    /// Talking to the actuator failed mid-session.
    Failed,
}

/// A flag that asks a running session to wrap up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Ask the session to stop at its next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag for the next session.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One session in progress.
#[derive(Debug, Clone)]
pub struct Session {
    /// When the session started.
    pub start: DateTime<Local>,
    /// Pellets presented.
    pub trials: u32,
    /// Presentations the detector saw taken.
    pub successes: u32,
    /// When each logged presentation happened.
    pub presentations: Vec<DateTime<Local>>,
    /// Where the recorder is writing.
    pub temp_video: PathBuf,
    /// Where the video goes if it is kept.
    pub final_video: PathBuf,
    last_presentation: Instant,
}

impl Session {
    fn new(profile: &AnimalProfile, start: DateTime<Local>) -> Self {
        Self {
            start,
            trials: 0,
            successes: 0,
            presentations: Vec::new(),
            temp_video: temp_video_path(profile, start),
            final_video: permanent_video_path(profile, start),
            last_presentation: Instant::now(),
        }
    }
}

/// What a finished session amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Pellets presented.
    pub trials: u32,
    /// Presentations the detector saw taken.
    pub successes: u32,
    /// Timestamps written to the display history.
    pub presentations: usize,
    /// What became of the video.
    pub video: VideoOutcome,
    /// Why the session ended.
    pub termination: Termination,
}

/// The knobs a session runs with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Presentation strategy.
    pub mode: PresentationMode,
    /// Waits and sleeps.
    pub timings: Timings,
    /// Video retention odds.
    pub retention: Retention,
}

impl From<&RigConfig> for SessionSettings {
    fn from(config: &RigConfig) -> Self {
        Self {
            mode: config.mode,
            timings: config.timings.clone(),
            retention: Retention::one_in(config.retention_odds),
        }
    }
}

/// Runs sessions, one at a time, over one actuator link.
pub struct SessionController<P: Port> {
    link: SerialLink<P>,
    launcher: Box<dyn RecorderLauncher>,
    detector: PelletDetector,
    settings: SessionSettings,
    rng: StdRng,
    cancel: CancelToken,
    state: SessionState,
}

impl<P: Port> SessionController<P> {
    /// Build a controller. The retention draw is seeded from the OS. Fails
    /// if the presentation mode cannot work.
    pub fn new(
        link: SerialLink<P>,
        launcher: Box<dyn RecorderLauncher>,
        detector: PelletDetector,
        settings: SessionSettings,
    ) -> Result<Self, RigError> {
        settings.mode.validate()?;
        Ok(Self {
            link,
            launcher,
            detector,
            settings,
            rng: StdRng::from_entropy(),
            cancel: CancelToken::default(),
            state: SessionState::Idle,
        })
    }

    /// Use `rng` for retention draws.
    pub fn with_rng(self, rng: StdRng) -> Self {
        Self { rng, ..self }
    }

    /// The actuator link, for the admission handshake around sessions.
    pub fn link_mut(&mut self) -> &mut SerialLink<P> {
        &mut self.link
    }

    /// A handle that can stop the running session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run one whole session for `profile`, returning once it has been
    /// finalized. `profile` comes back with its session count bumped and
    /// saved to disk.
    pub fn run(&mut self, profile: &mut AnimalProfile) -> Result<SessionOutcome, RigError> {
        self.state = SessionState::Initializing;
        let (mut session, mut recorder) = match self.initialize(profile) {
            Ok(started) => started,
            Err(e) => {
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        self.state = SessionState::Polling;
        let termination = match self.poll(profile, &mut session, recorder.as_mut()) {
            Ok(termination) => termination,
            Err(e) => {
                error!("Session loop failed: {}", e);
                Termination::Failed
            }
        };

        self.state = SessionState::Finalizing;
        let outcome = self.finalize(profile, session, recorder.as_mut(), termination);
        self.cancel.reset();
        self.state = SessionState::Idle;
        outcome
    }

    fn initialize(
        &mut self,
        profile: &mut AnimalProfile,
    ) -> Result<(Session, Box<dyn Recorder>), RigError> {
        let setup = ActuatorCommand::position_setup(profile.difficulty)?;

        profile.session_count += 1;
        let session = Session::new(profile, Local::now());
        info!("-------------------------------------------");
        info!("Starting session for {}", profile.name);
        info!("Start Time: {}", session.start.format("%Y%m%d-%H:%M:%S"));
        info!("Saving as: {}", session.final_video.display());

        if let Err(e) = fs::create_dir_all(profile.video_dir()) {
            warn!("Could not create {}: {}", profile.video_dir().display(), e);
        }
        let recorder = self
            .launcher
            .launch(&session.temp_video, profile.is_test_tag())?;

        self.link.send_all(&setup)?;
        info!(
            "Positioning: {:?}",
            setup[1..]
                .iter()
                .map(|c| c.encode() as char)
                .collect::<String>()
        );

        spin_sleep::sleep(self.settings.timings.grace());
        Ok((session, recorder))
    }

    fn poll(
        &mut self,
        profile: &AnimalProfile,
        session: &mut Session,
        recorder: &mut dyn Recorder,
    ) -> Result<Termination, RigError> {
        let started = Instant::now();
        let timings = self.settings.timings.clone();

        match self.settings.mode {
            PresentationMode::Smoothed { window, threshold } => {
                let mut window = DetectionWindow::new(window, threshold);
                // Only re-presentations go to the display history.
                self.present(session, Hand::Left, false)?;

                loop {
                    let since = session.last_presentation.elapsed();
                    if since >= timings.detection_interval() {
                        if let Some(detection) = self.detect(recorder) {
                            window.push(detection);
                        }
                        if window.triggered() {
                            info!("Pellet detector can't see a pellet... lowering arm");
                        }
                    }

                    let since = session.last_presentation.elapsed();
                    if window.lower_arm(since, timings.hard_limit()) {
                        if !window.triggered() {
                            info!("{:?} have passed, presenting new pellet", timings.hard_limit());
                        }
                        self.present(session, Hand::Left, true)?;
                        window.reset();
                        spin_sleep::sleep(timings.after_present());
                    }

                    if let Some(t) = self.check_termination(started)? {
                        return Ok(t);
                    }
                    spin_sleep::sleep(timings.poll());
                }
            }

            PresentationMode::Cycling => loop {
                self.present(session, Hand::Left, false)?;
                spin_sleep::sleep(timings.cycle_settle());

                if let Some(Detection::Absent) = self.detect(recorder) {
                    session.successes += 1;
                    session.presentations.push(Local::now());
                }
                info!(
                    "Total trials: {}, successful trials: {}, percentage: {:.3}",
                    session.trials,
                    session.successes,
                    session.successes as f64 / session.trials as f64
                );

                if let Some(t) = self.check_termination(started)? {
                    return Ok(t);
                }
                spin_sleep::sleep(timings.poll());
            },

            PresentationMode::HandTimed => loop {
                if session.last_presentation.elapsed() >= timings.hand_interval() {
                    self.present(session, profile.dominant_hand, true)?;
                    spin_sleep::sleep(timings.after_present());
                }

                if let Some(t) = self.check_termination(started)? {
                    return Ok(t);
                }
                spin_sleep::sleep(timings.poll());
            },
        }
    }

    fn present(&mut self, session: &mut Session, hand: Hand, logged: bool) -> Result<(), RigError> {
        self.link.send(ActuatorCommand::Present(hand))?;
        self.link.flush_output()?;
        session.trials += 1;
        session.last_presentation = Instant::now();
        if logged {
            session.presentations.push(Local::now());
        }
        Ok(())
    }

    fn detect(&mut self, recorder: &mut dyn Recorder) -> Option<Detection> {
        match self.detector.request_detection(recorder) {
            Ok(detection) => Some(detection),
            Err(e) => {
                warn!("Detection failed: {}", e);
                None
            }
        }
    }

    fn check_termination(&mut self, started: Instant) -> Result<Option<Termination>, RigError> {
        if self.cancel.is_cancelled() {
            info!("Session cancelled");
            return Ok(Some(Termination::Cancelled));
        }
        if let Some(max) = self.settings.timings.max_session() {
            if started.elapsed() >= max {
                warn!("No TERM after {:?}, ending session", max);
                return Ok(Some(Termination::TimedOut));
            }
        }

        match self.link.poll_reply(self.settings.timings.reply_timeout())? {
            Some(ActuatorReply::Terminate) => {
                info!("Received TERM from the actuator controller");
                self.link.flush_output()?;
                self.link.flush_input()?;
                Ok(Some(Termination::Signalled))
            }
            Some(ActuatorReply::Other(line)) => {
                info!("Received message from the actuator controller: {}", line);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn finalize(
        &mut self,
        profile: &AnimalProfile,
        session: Session,
        recorder: &mut dyn Recorder,
        termination: Termination,
    ) -> Result<SessionOutcome, RigError> {
        let timings = &self.settings.timings;
        if let Err(e) = recorder.stop(timings.recorder_stop_timeout()) {
            warn!("Recorder did not stop cleanly: {}", e);
        }
        if let Err(e) = wait_until_released(&session.temp_video, timings.video_release_timeout()) {
            warn!("{}", e);
        }

        let keep = session.trials > 0 && self.settings.retention.keep(&mut self.rng);
        let video = finalize_video(
            &session.temp_video,
            &session.final_video,
            session.trials,
            keep,
        );

        let end = Local::now();
        let record = SessionRecord {
            start: session.start,
            end,
            trials: session.trials,
            successes: session.successes,
        };
        // The video already carries the new session count, so the profile is
        // saved even if a log could not be written.
        let logged = append_session_entry(profile, &record)
            .and(append_display_history(profile, &session.presentations));
        let saved = profile.save();
        logged?;
        saved?;

        info!("End Time: {}", end.format("%a, %d %b %Y %H:%M:%S"));
        info!("{}'s session has completed", profile.name);
        info!("-------------------------------------------");

        Ok(SessionOutcome {
            trials: session.trials,
            successes: session.successes,
            presentations: session.presentations.len(),
            video: video?,
            termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_log::{display_history_path, session_history_path};
    use crate::testing::{MockPort, ScriptedClassifier, ScriptedLauncher};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn fast_timings() -> Timings {
        Timings {
            settle_ms: 0,
            grace_ms: 0,
            poll_ms: 2,
            detection_interval_ms: 0,
            hard_limit_ms: 60_000,
            cycle_settle_ms: 5,
            hand_interval_ms: 20,
            after_present_ms: 0,
            after_detection_ms: 0,
            detection_timeout_ms: 100,
            recorder_stop_timeout_ms: 100,
            video_release_timeout_ms: 100,
            reply_timeout_ms: 100,
            tag_timeout_ms: 100,
            port_read_timeout_ms: 1,
            max_session_ms: Some(5_000),
        }
    }

    fn profile(root: &TempDir, name: &str, hand: Hand) -> AnimalProfile {
        let directory = root.path().join(name);
        fs::create_dir_all(&directory).unwrap();
        AnimalProfile {
            id: "0A00B1C2D3E4".to_owned(),
            name: name.to_owned(),
            mouse_number: "1".to_owned(),
            cage_number: "7".to_owned(),
            difficulty: [3, 12, 18],
            dominant_hand: hand,
            session_count: 42,
            directory,
        }
    }

    struct Rig {
        port: MockPort,
        launcher: ScriptedLauncher,
        controller: SessionController<MockPort>,
    }

    fn rig(root: &TempDir, mode: PresentationMode, answers: Vec<Detection>, keep: bool) -> Rig {
        let port = MockPort::new();
        let frame = root.path().join("detection_frame.jpg");
        let launcher = ScriptedLauncher::new(frame.clone());
        let detector = PelletDetector::new(
            Box::new(ScriptedClassifier::new(answers)),
            frame,
            Duration::from_millis(100),
            Duration::ZERO,
        );
        let settings = SessionSettings {
            mode,
            timings: fast_timings(),
            retention: Retention::one_in(if keep { 1 } else { 0 }),
        };
        let controller = SessionController::new(
            SerialLink::new(port.clone()),
            Box::new(launcher.clone()),
            detector,
            settings,
        )
        .unwrap()
        .with_rng(StdRng::seed_from_u64(3));

        Rig {
            port,
            launcher,
            controller,
        }
    }

    fn lines(path: PathBuf) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn hand_timed_session_end_to_end() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Right);
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], true);
        rig.port
            .push_input_after(Duration::from_millis(150), b"TERM\r\n");

        let outcome = rig.controller.run(&mut p).unwrap();

        assert_eq!(outcome.termination, Termination::Signalled);
        assert_eq!(rig.controller.state(), SessionState::Idle);
        assert!(outcome.trials >= 1);
        assert_eq!(outcome.successes, 0);

        let written = rig.port.written();
        assert_eq!(&written[..4], b"33ci");
        assert_eq!(written.len() - 4, outcome.trials as usize);
        assert!(written[4..].iter().all(|&b| b == b'2'));

        match &outcome.video {
            VideoOutcome::Kept(path) => {
                assert!(path.exists());
                assert!(path.to_string_lossy().ends_with("_0A00B1C2D3E4_7_43.avi"));
            }
            other => panic!("expected kept video, got {:?}", other),
        }

        let history = lines(session_history_path(&p));
        assert_eq!(history.len(), 1);
        assert!(history[0].starts_with(&format!(
            "43,MOUSE1,0A00B1C2D3E4,{},0,3,12,18,RIGHT,",
            outcome.trials
        )));
        assert_eq!(
            lines(display_history_path(&p)).len(),
            outcome.trials as usize
        );

        let saved = AnimalProfile::load(&p.directory).unwrap();
        assert_eq!(saved.session_count, 43);
        assert!(rig.launcher.stopped());
    }

    #[test]
    fn smoothed_session_re_presents_when_pellet_missing() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Both);
        let mut rig = rig(
            &root,
            PresentationMode::Smoothed {
                window: 3,
                threshold: 2,
            },
            vec![Detection::Absent],
            false,
        );
        rig.port.push_input_after(Duration::from_millis(200), b"TERM\n");

        let outcome = rig.controller.run(&mut p).unwrap();

        assert!(outcome.trials >= 2, "trials {}", outcome.trials);
        assert_eq!(outcome.successes, 0);
        assert_eq!(outcome.presentations, outcome.trials as usize - 1);
        assert_eq!(
            lines(display_history_path(&p)).len(),
            outcome.trials as usize - 1
        );
        assert!(rig.launcher.frames_requested() >= 2);
        assert!(rig.port.written()[4..].iter().all(|&b| b == b'1'));
        assert_eq!(outcome.video, VideoOutcome::Dropped);
    }

    #[test]
    fn smoothed_session_waits_while_pellet_visible() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        let mut rig = rig(
            &root,
            PresentationMode::Smoothed {
                window: 3,
                threshold: 2,
            },
            vec![Detection::Present],
            false,
        );
        rig.port.push_input_after(Duration::from_millis(100), b"TERM\n");

        let outcome = rig.controller.run(&mut p).unwrap();

        assert_eq!(outcome.trials, 1);
        assert_eq!(outcome.presentations, 0);
        assert!(rig.launcher.frames_requested() >= 1);
    }

    #[test]
    fn stray_bytes_do_not_end_the_session() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], false);
        rig.port.push_input(b"x");
        rig.port
            .push_input_after(Duration::from_millis(400), b"\nTERM\n");

        let outcome = rig.controller.run(&mut p).unwrap();

        assert_eq!(outcome.termination, Termination::Signalled);
        assert!(outcome.trials >= 1);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let root = tempdir().unwrap();
        let frame = root.path().join("detection_frame.jpg");
        let detector = PelletDetector::new(
            Box::new(ScriptedClassifier::new(vec![Detection::Present])),
            &frame,
            Duration::from_millis(100),
            Duration::ZERO,
        );
        let settings = SessionSettings {
            mode: PresentationMode::Smoothed {
                window: 3,
                threshold: 0,
            },
            timings: fast_timings(),
            retention: Retention::one_in(0),
        };

        let controller = SessionController::new(
            SerialLink::new(MockPort::new()),
            Box::new(ScriptedLauncher::new(frame.clone())),
            detector,
            settings,
        );
        assert!(matches!(controller, Err(RigError::InvalidConfig(_))));
    }

    #[test]
    fn profile_is_saved_when_logs_cannot_be_written() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        // A plain file where the log directory should be.
        fs::write(p.log_dir(), b"in the way").unwrap();
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], false);
        rig.port.push_input(b"TERM\n");

        assert!(rig.controller.run(&mut p).is_err());

        let saved = AnimalProfile::load(&p.directory).unwrap();
        assert_eq!(saved.session_count, 43);
        assert_eq!(rig.controller.state(), SessionState::Idle);
    }

    #[test]
    fn cycling_session_counts_taken_pellets() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        let mut rig = rig(
            &root,
            PresentationMode::Cycling,
            vec![Detection::Absent, Detection::Present],
            false,
        );
        rig.port.push_input_after(Duration::from_millis(100), b"TERM\n");

        let outcome = rig.controller.run(&mut p).unwrap();

        assert!(outcome.trials >= 2);
        assert_eq!(outcome.successes, 1);
        assert!(outcome.successes <= outcome.trials);
        assert_eq!(lines(display_history_path(&p)).len(), 1);
    }

    #[test]
    fn no_trials_discards_video() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], true);
        rig.controller.settings.timings.hand_interval_ms = 60_000;
        rig.port.push_input(b"TERM\n");

        let outcome = rig.controller.run(&mut p).unwrap();

        assert_eq!(outcome.trials, 0);
        assert_eq!(outcome.video, VideoOutcome::Discarded);
        let launched = rig.launcher.launched();
        assert!(!launched[0].0.exists());
        assert_eq!(lines(session_history_path(&p)).len(), 1);
    }

    #[test]
    fn test_tags_launch_recorder_in_test_mode() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "TEST_TAG", Hand::Left);
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], false);
        rig.port.push_input(b"TERM\n");

        rig.controller.run(&mut p).unwrap();

        let launched = rig.launcher.launched();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].1);
        assert!(launched[0]
            .0
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("temp_"));
    }

    #[test]
    fn missing_term_times_out() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], false);
        rig.controller.settings.timings.max_session_ms = Some(50);

        let outcome = rig.controller.run(&mut p).unwrap();
        assert_eq!(outcome.termination, Termination::TimedOut);
    }

    #[test]
    fn cancelled_session_still_finalizes() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], false);
        rig.controller.cancel_token().cancel();

        let outcome = rig.controller.run(&mut p).unwrap();

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(!rig.controller.cancel_token().is_cancelled());
        assert_eq!(lines(session_history_path(&p)).len(), 1);
    }

    #[test]
    fn bad_difficulty_never_starts() {
        let root = tempdir().unwrap();
        let mut p = profile(&root, "MOUSE1", Hand::Left);
        p.difficulty = [3, 25, 1];
        let mut rig = rig(&root, PresentationMode::HandTimed, vec![], false);

        assert!(matches!(
            rig.controller.run(&mut p),
            Err(RigError::DistanceOutOfRange(25))
        ));
        assert_eq!(p.session_count, 42);
        assert!(rig.launcher.launched().is_empty());
        assert!(rig.port.written().is_empty());
        assert_eq!(rig.controller.state(), SessionState::Idle);
    }
}
