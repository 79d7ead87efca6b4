//! Animal profiles and the directory tree they live in.
//!
//! Every animal gets a directory under the profile root:
//!
//! ```text
//! <root>
//!   - MOUSE1
//!       - Analyses
//!       - Logs
//!       - Temp
//!       - Videos
//!       - MOUSE1_save.txt
//! ```
//!
//! The save file is a record of newline separated fields, in this order:
//! tag, name, mouse number, cage number, three difficulty distances, dominant
//! hand (`LEFT`, `RIGHT` or `BOTH`) and session count. A tenth line with the
//! profile directory is written for humans and never read back.

use crate::error::RigError;

use log::{info, warn};
use nom::{
    character::complete::{line_ending, not_line_ending},
    combinator::{map, map_res, opt},
    sequence::{terminated, tuple},
    Finish, IResult,
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Which paw the animal reaches with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    /// Left paw.
    Left,
    /// Right paw.
    Right,
    /// Either paw.
    Both,
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Hand::Left => "LEFT",
            Hand::Right => "RIGHT",
            Hand::Both => "BOTH",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Hand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEFT" => Ok(Hand::Left),
            "RIGHT" => Ok(Hand::Right),
            "BOTH" => Ok(Hand::Both),
            other => Err(format!("unknown hand {:?}", other)),
        }
    }
}

/// Everything the rig knows about one animal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimalProfile {
    /// The RFID tag implanted in the animal.
    pub id: String,
    /// Name, also the name of the profile directory.
    pub name: String,
    /// Position of the animal in its cage, used as its trial limit slot.
    pub mouse_number: String,
    /// Cage the animal lives in.
    pub cage_number: String,
    /// The two stepper distances and the servo height.
    pub difficulty: [u32; 3],
    /// Preferred paw.
    pub dominant_hand: Hand,
    /// Number of sessions so far, bumped at the start of every session.
    pub session_count: u32,
    /// The profile's own directory.
    pub directory: PathBuf,
}

fn field(s: &str) -> IResult<&str, &str> {
    map(terminated(not_line_ending, opt(line_ending)), str::trim)(s)
}

fn number_field(s: &str) -> IResult<&str, u32> {
    map_res(field, str::parse::<u32>)(s)
}

fn hand_field(s: &str) -> IResult<&str, Hand> {
    map_res(field, Hand::from_str)(s)
}

#[allow(clippy::type_complexity)]
fn parse_record(s: &str) -> IResult<&str, (&str, &str, &str, &str, u32, u32, u32, Hand, u32)> {
    tuple((
        field,
        field,
        field,
        field,
        number_field,
        number_field,
        number_field,
        hand_field,
        number_field,
    ))(s)
}

impl AnimalProfile {
    /// Build a profile from the text of a save file. `directory` is where the
    /// file was found, it is not taken from the record.
    pub fn from_record(text: &str, directory: impl Into<PathBuf>) -> Result<Self, RigError> {
        let directory = directory.into();
        match parse_record(text).finish() {
            Ok((_rest, (id, name, mouse, cage, d1, d2, d3, hand, sessions))) => {
                if id.is_empty() || name.is_empty() {
                    return Err(RigError::MalformedRecord {
                        path: directory,
                        reason: "empty tag or name".to_owned(),
                    });
                }
                Ok(AnimalProfile {
                    id: id.to_owned(),
                    name: name.to_owned(),
                    mouse_number: mouse.to_owned(),
                    cage_number: cage.to_owned(),
                    difficulty: [d1, d2, d3],
                    dominant_hand: hand,
                    session_count: sessions,
                    directory,
                })
            }
            Err(e) => Err(RigError::MalformedRecord {
                path: directory,
                reason: format!("{:?} near {:?}", e.code, e.input.lines().next()),
            }),
        }
    }

    /// The save file contents, ten lines.
    pub fn to_record(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.id,
            self.name,
            self.mouse_number,
            self.cage_number,
            self.difficulty[0],
            self.difficulty[1],
            self.difficulty[2],
            self.dominant_hand,
            self.session_count,
            self.directory.display(),
        )
    }

    /// Read the profile stored in `directory`.
    pub fn load(directory: impl AsRef<Path>) -> Result<Self, RigError> {
        let directory = directory.as_ref();
        let dir_name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = directory.join(format!("{}_save.txt", dir_name));
        let text = fs::read_to_string(&path)?;
        Self::from_record(&text, directory).map_err(|e| match e {
            RigError::MalformedRecord { reason, .. } => RigError::MalformedRecord { path, reason },
            other => other,
        })
    }

    /// Overwrite the save file with the current field values.
    pub fn save(&self) -> Result<(), RigError> {
        fs::write(self.record_path(), self.to_record())?;
        Ok(())
    }

    /// `<dir>/<name>_save.txt`
    pub fn record_path(&self) -> PathBuf {
        self.directory.join(format!("{}_save.txt", self.name))
    }

    /// Where this animal's session videos go.
    pub fn video_dir(&self) -> PathBuf {
        self.directory.join("Videos")
    }

    /// Where this animal's logs go.
    pub fn log_dir(&self) -> PathBuf {
        self.directory.join("Logs")
    }

    /// The trial limit slot, if the mouse number is one.
    pub fn slot(&self) -> Option<u8> {
        self.mouse_number.parse().ok()
    }

    /// Test tags run the recorder in its test mode.
    pub fn is_test_tag(&self) -> bool {
        self.name.contains("TEST")
    }
}

/// Load every profile found under `root`. Profiles that cannot be read are
/// skipped with a warning; only failing to list `root` itself is an error.
pub fn load_all(root: impl AsRef<Path>) -> Result<Vec<AnimalProfile>, RigError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root.as_ref())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let profiles = dirs
        .into_iter()
        .filter_map(|dir| match AnimalProfile::load(&dir) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Could not open animal profile in {}: {}", dir.display(), e);
                None
            }
        })
        .collect();

    Ok(profiles)
}

/// First profile whose tag matches, if there is one.
pub fn find_by_id<'a>(profiles: &'a [AnimalProfile], tag: &str) -> Option<&'a AnimalProfile> {
    profiles.iter().find(|p| p.id == tag)
}

/// Create a fresh profile directory tree for `name` under `root`, with a
/// default record and an empty session history. Returns `None` if the
/// profile already exists.
pub fn provision(
    root: impl AsRef<Path>,
    name: &str,
    cage_number: &str,
) -> Result<Option<AnimalProfile>, RigError> {
    let directory = root.as_ref().join(name);
    if directory.is_dir() {
        info!("{} already has a profile! Skipping profile creation...", name);
        return Ok(None);
    }
    info!("Creating profile for {}...", name);

    for sub in ["Analyses", "Logs", "Videos", "Temp"] {
        fs::create_dir_all(directory.join(sub))?;
    }

    let profile = AnimalProfile {
        id: "0".to_owned(),
        name: name.to_owned(),
        mouse_number: name
            .chars()
            .last()
            .map(String::from)
            .unwrap_or_default(),
        cage_number: cage_number.to_owned(),
        difficulty: [0, 0, 0],
        dominant_hand: Hand::Left,
        session_count: 1,
        directory,
    };
    profile.save()?;
    fs::File::create(crate::session_log::session_history_path(&profile))?;

    Ok(Some(profile))
}
