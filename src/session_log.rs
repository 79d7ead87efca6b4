//! Append-only per-animal logs written at the end of every session.

use crate::error::RigError;
use crate::profile::AnimalProfile;

use chrono::{DateTime, Local};
use log::warn;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// `Logs/<name>_session_history.csv`
pub fn session_history_path(profile: &AnimalProfile) -> PathBuf {
    profile
        .log_dir()
        .join(format!("{}_session_history.csv", profile.name))
}

/// `Logs/<name>_display_history.txt`
pub fn display_history_path(profile: &AnimalProfile) -> PathBuf {
    profile
        .log_dir()
        .join(format!("{}_display_history.txt", profile.name))
}

/// The numbers that go into one session history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// When the session started.
    pub start: DateTime<Local>,
    /// When the session ended.
    pub end: DateTime<Local>,
    /// Presentations made.
    pub trials: u32,
    /// Presentations where the detector saw a pellet.
    pub successes: u32,
}

/// Format the CSV row for `record`, without a trailing newline:
///
/// ```text
/// session,name,tag,trials,successes,d1,d2,d3,hand,start date,start time,end date,end time
/// ```
pub fn session_row(profile: &AnimalProfile, record: &SessionRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{}",
        profile.session_count,
        profile.name,
        profile.id,
        record.trials,
        record.successes,
        profile.difficulty[0],
        profile.difficulty[1],
        profile.difficulty[2],
        profile.dominant_hand,
        record.start.format("%d-%b-%Y"),
        record.start.format("%H:%M:%S"),
        record.end.format("%d-%b-%Y"),
        record.end.format("%H:%M:%S"),
    )
}

/// Append one row to the profile's session history, creating the file if it
/// does not exist yet.
pub fn append_session_entry(profile: &AnimalProfile, record: &SessionRecord) -> Result<(), RigError> {
    let line = session_row(profile, record) + "\n";
    append(&session_history_path(profile), line.as_bytes())
}

/// Append one `YYYY/MM/DD,HH:MM:SS` line per presentation.
pub fn append_display_history(
    profile: &AnimalProfile,
    presentations: &[DateTime<Local>],
) -> Result<(), RigError> {
    let text: String = presentations
        .iter()
        .map(|t| format!("{}\n", t.format("%Y/%m/%d,%H:%M:%S")))
        .collect();
    append(&display_history_path(profile), text.as_bytes())
}

fn append(path: &Path, bytes: &[u8]) -> Result<(), RigError> {
    if let Some(dir) = path.parent() {
        // A failure here surfaces again when the open below fails.
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Could not create log directory {}: {}", dir.display(), e);
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Hand;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn profile(dir: &Path) -> AnimalProfile {
        AnimalProfile {
            id: "0A00B1C2D3E4".to_owned(),
            name: "MOUSE2".to_owned(),
            mouse_number: "2".to_owned(),
            cage_number: "7".to_owned(),
            difficulty: [3, 5, 16],
            dominant_hand: Hand::Both,
            session_count: 9,
            directory: dir.to_owned(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, h, m, s).unwrap()
    }

    #[test]
    fn row_layout() {
        let p = profile(Path::new("/tmp"));
        let record = SessionRecord {
            start: at(9, 1, 2),
            end: at(9, 15, 0),
            trials: 12,
            successes: 4,
        };
        assert_eq!(
            session_row(&p, &record),
            "9,MOUSE2,0A00B1C2D3E4,12,4,3,5,16,BOTH,05-Mar-2024,09:01:02,05-Mar-2024,09:15:00"
        );
    }

    #[test]
    fn rows_append_and_create_missing_file() {
        let root = tempdir().unwrap();
        let p = profile(root.path());
        let record = SessionRecord {
            start: at(10, 0, 0),
            end: at(10, 5, 0),
            trials: 1,
            successes: 0,
        };

        append_session_entry(&p, &record).unwrap();
        append_session_entry(&p, &record).unwrap();

        let text = fs::read_to_string(session_history_path(&p)).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn display_history_lines() {
        let root = tempdir().unwrap();
        let p = profile(root.path());

        append_display_history(&p, &[at(8, 0, 1), at(8, 0, 30)]).unwrap();

        let text = fs::read_to_string(display_history_path(&p)).unwrap();
        assert_eq!(text, "2024/03/05,08:00:01\n2024/03/05,08:00:30\n");
    }
}
