//! ReachRig runs a single-pellet reaching task for mice. An animal walks into
//! the experiment tube, its implanted RFID tag is read, and if the tag belongs
//! to a known animal that still has sessions left today, a session starts:
//! the apparatus is positioned for the animal's difficulty, a video recorder
//! is started, and pellets are presented until the animal leaves the tube.
//! Every session is appended to the animal's logs.
//!
//! This is the host-side software. It talks to two serial devices (the RFID
//! reader and the actuator controller driving the steppers and the arm), one
//! recorder subprocess, and optionally a pellet classifier.
//!
//! The pieces, leaves first:
//!
//! - [`rfid`] turns the reader's byte stream into tags.
//! - [`profile`] loads and saves the per-animal records.
//! - [`serial_link`] and [`command`] speak to the actuator controller.
//! - [`recorder`] and [`detector`] drive the recorder and the classifier.
//! - [`session`] runs one session end to end.
//! - [`admission`] decides what a tag read at the tube gets.

#![warn(missing_docs)]
pub mod admission;
pub mod args;
pub mod command;
pub mod config;
pub mod detector;
pub mod error;
pub mod profile;
pub mod recorder;
pub mod rfid;
pub mod serial_link;
pub mod session;
pub mod session_log;
pub mod trial_limits;
pub mod video;

#[cfg(test)]
#[allow(missing_docs)]
mod testing;

pub use error::RigError;
