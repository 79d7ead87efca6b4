//! Commandline argument parser using clap for ReachRig

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Host software for the pellet reaching rig
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct RigArgs {
    #[command(subcommand, long_about)]
    /// What to do: run the rig, set up profiles, or list serial ports
    pub command: RigTask,

    /// Path to the RON rig configuration
    #[arg(short = 'c', long = "config", default_value = "rig.ron")]
    pub config: PathBuf,
}

/// Subcommands of the rig
#[derive(Debug, Subcommand, Clone)]
pub enum RigTask {
    /// Wait for tags and run sessions until killed
    #[command(about)]
    Run(RunCommand),

    /// Create profile directories for a new cage
    #[command(about)]
    Provision(ProvisionCommand),

    /// List the serial ports on this machine
    #[command(about)]
    Ports,
}

/// Run sessions for tagged animals
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct RunCommand {
    /// Serial device of the actuator controller, overrides the config
    #[arg(short = 'a', long = "actuator")]
    pub actuator_port: Option<String>,

    /// Serial device of the RFID reader, overrides the config
    #[arg(short = 'r', long = "rfid")]
    pub rfid_port: Option<String>,
}

/// Set up the profiles of a new cage
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ProvisionCommand {
    /// Cage number written into every new profile
    #[arg(long = "cage")]
    pub cage_number: String,

    /// Number of mice in the cage, profiles are named MOUSE1 to MOUSEn
    #[arg(short = 'n', long = "mice", default_value_t = 5)]
    pub num_mice: u32,

    /// Skip the TEST_TAG profile
    #[arg(long = "no-test-tag")]
    pub no_test_tag: bool,
}
