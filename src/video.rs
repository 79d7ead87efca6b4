//! Naming, releasing, and keeping (or not) the session videos.
//!
//! The recorder writes into a temporary file. When the session ends, a video
//! with no trials in it is thrown away, and any other video survives only if
//! the retention draw says so; the rest are deleted to save disk.

use crate::error::RigError;
use crate::profile::AnimalProfile;

use chrono::{DateTime, Local};
use log::{info, warn};
use rand::Rng;
use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, Instant},
};

/// `Videos/temp_<YYYYmmdd-HHMMSS>.avi`
pub fn temp_video_path(profile: &AnimalProfile, now: DateTime<Local>) -> PathBuf {
    profile
        .video_dir()
        .join(format!("temp_{}.avi", now.format("%Y%m%d-%H%M%S")))
}

/// `Videos/<YYYY-mm-dd_(HH-MM-SS)>_<tag>_<cage>_<session>.avi`
pub fn permanent_video_path(profile: &AnimalProfile, start: DateTime<Local>) -> PathBuf {
    profile.video_dir().join(format!(
        "{}_{}_{}_{}.avi",
        start.format("%Y-%m-%d_(%H-%M-%S)"),
        profile.id,
        profile.cage_number,
        profile.session_count
    ))
}

/// Keep one video in `odds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    odds: u32,
}

impl Retention {
    /// Keep with probability `1 / odds`. Zero odds never keep.
    pub fn one_in(odds: u32) -> Self {
        Self { odds }
    }

    /// Draw a number in `1..=odds`; the video is kept on a 1.
    pub fn keep(&self, rng: &mut impl Rng) -> bool {
        if self.odds == 0 {
            return false;
        }
        let draw = rng.gen_range(1..=self.odds);
        info!("1/{} chance of saving, drew {}", self.odds, draw);
        draw == 1
    }
}

/// What became of a session's video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    /// No trials happened, the video was deleted.
    Discarded,
    /// The retention draw lost, the video was deleted.
    Dropped,
    /// The video was moved to its permanent path.
    Kept(PathBuf),
}

/// Wait until `path` can be opened for writing, i.e. nobody else holds it.
/// A file that does not exist counts as released.
pub fn wait_until_released(path: &Path, timeout: Duration) -> Result<(), RigError> {
    let deadline = Instant::now() + timeout;
    loop {
        match OpenOptions::new().append(true).open(path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                if Instant::now() >= deadline {
                    warn!("{} still locked: {}", path.display(), e);
                    return Err(RigError::Timeout {
                        waiting_for: "the session video to be released",
                        after: timeout,
                    });
                }
                sleep(Duration::from_millis(100));
            }
        }
    }
}

/// Delete or keep the temporary video. Exactly one of deleting `temp` or
/// renaming it to `permanent` happens.
pub fn finalize_video(
    temp: &Path,
    permanent: &Path,
    trials: u32,
    keep: bool,
) -> Result<VideoOutcome, RigError> {
    if trials == 0 {
        remove_if_present(temp)?;
        return Ok(VideoOutcome::Discarded);
    }

    if keep {
        fs::rename(temp, permanent)?;
        info!("Video saved as {}", permanent.display());
        Ok(VideoOutcome::Kept(permanent.to_owned()))
    } else {
        remove_if_present(temp)?;
        info!("Video deleted");
        Ok(VideoOutcome::Dropped)
    }
}

fn remove_if_present(path: &Path) -> Result<(), RigError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} was never written", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
