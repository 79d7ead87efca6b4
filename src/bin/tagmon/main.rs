//! Prints every tag the RFID reader sees. Handy for finding out which tag is
//! implanted in which animal.

use clap::Parser;
use log::{info, warn};
use reachrig::{rfid::RfidListener, serial_link::open_port};
use std::time::Duration;

#[derive(Debug, Parser)]
#[clap(version, about)]
struct TagmonArgs {
    /// Serial device of the RFID reader
    port: String,

    /// Baud rate of the reader
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,
}

fn main() {
    env_logger::init();
    let args = TagmonArgs::parse();

    // Reads time out so a half-received tag is dropped instead of hanging.
    let port = open_port(&args.port, args.baud, Duration::from_millis(100))
        .expect("Failed to open port");

    info!("Listening on {}", args.port);
    for tag in RfidListener::new(port).with_tag_timeout(Duration::from_secs(2)) {
        match tag {
            Ok(tag) => println!("{}", tag),
            Err(e) => warn!("{}", e),
        }
    }
}
