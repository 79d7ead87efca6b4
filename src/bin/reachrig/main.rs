//! Waits for tagged animals at the tube and runs their sessions.

use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use reachrig::{
    admission::Admissions,
    args::{ProvisionCommand, RigArgs, RigTask, RunCommand},
    config::RigConfig,
    detector::{CommandClassifier, PelletDetector},
    profile,
    recorder::ProcessLauncher,
    rfid::{truncate_tag, RfidListener},
    serial_link::{open_port, SerialLink},
    session::{SessionController, SessionSettings},
    RigError,
};
use serial2::SerialPort;
use std::{fs, io, process::ExitCode};

// Example:
// cargo run --bin reachrig -- --config rig.ron run --actuator /dev/ttyUSB0 --rfid /dev/ttyUSB1
// cargo run --bin reachrig -- provision --cage 12

fn main() -> ExitCode {
    env_logger::init();
    let args = RigArgs::parse();

    let result = RigConfig::load(&args.config).and_then(|config| match args.command {
        RigTask::Run(cmd) => run(config, cmd),
        RigTask::Provision(cmd) => provision(&config, cmd),
        RigTask::Ports => list_ports(),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_ports() -> Result<(), RigError> {
    let available_ports = SerialPort::available_ports()?;
    println!("Available devices:");
    for port in available_ports {
        println!("\t{}", port.to_string_lossy());
    }
    Ok(())
}

/// Use the configured device, or ask for one.
fn choose_port(configured: Option<String>, what: &str) -> Result<String, RigError> {
    if let Some(port) = configured {
        return Ok(port);
    }
    list_ports()?;
    println!("Enter the {} device name: ", what);
    let mut device_name = String::new();
    io::stdin().read_line(&mut device_name)?;
    Ok(device_name.trim().to_owned())
}

fn provision(config: &RigConfig, cmd: ProvisionCommand) -> Result<(), RigError> {
    fs::create_dir_all(&config.profiles_dir)?;

    let mut names: Vec<String> = (1..=cmd.num_mice).map(|i| format!("MOUSE{}", i)).collect();
    if !cmd.no_test_tag {
        names.push("TEST_TAG".to_owned());
    }
    for name in names {
        profile::provision(&config.profiles_dir, &name, &cmd.cage_number)?;
    }

    info!("Every tag is set to 0 for now; put each mouse's RFID on the first line of its <name>_save.txt");
    Ok(())
}

fn run(config: RigConfig, cmd: RunCommand) -> Result<(), RigError> {
    let actuator_path = choose_port(
        cmd.actuator_port.or_else(|| config.actuator_port.clone()),
        "actuator controller",
    )?;
    let rfid_path = choose_port(
        cmd.rfid_port.or_else(|| config.rfid_port.clone()),
        "RFID reader",
    )?;
    let timings = &config.timings;

    let mut admissions = Admissions::from_config(&config)?;

    info!("If the rig is stuck here, check the serial port configuration");
    let actuator = open_port(&actuator_path, config.baud_rate, timings.port_read_timeout())?;
    let rfid = open_port(&rfid_path, config.baud_rate, timings.port_read_timeout())?;

    let detector = PelletDetector::new(
        Box::new(CommandClassifier::new(config.classifier.clone())),
        &config.frame_path,
        timings.detection_timeout(),
        timings.after_detection(),
    );
    let launcher = ProcessLauncher::new(config.recorder.clone(), &config.frame_path);
    let mut controller = SessionController::new(
        SerialLink::new(actuator),
        Box::new(launcher),
        detector,
        SessionSettings::from(&config),
    )?;

    let mut tags = RfidListener::new(rfid).with_tag_timeout(timings.tag_timeout());
    info!("Waiting for RFID...");
    while let Some(tag) = tags.next() {
        match tag {
            Ok(tag) => {
                let tag = truncate_tag(&tag, config.tag_length);
                admissions.handle_tag(&tag, Local::now().naive_local(), &mut controller)?;
            }
            Err(e) => warn!("Bad RFID read: {}", e),
        }

        // The tag is read over and over while the animal wiggles in the tube;
        // none of those reads should start another session.
        if let Err(e) = tags.get_ref().discard_buffers() {
            warn!("Could not clear the RFID buffers: {}", e);
        }
        tags.reset();
        info!("Waiting for RFID...");
    }

    Ok(())
}
