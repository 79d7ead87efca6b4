//! A thin wrapper around the serial port that talks to the actuator
//! controller. Commands go out as single bytes, replies come back as lines.

use crate::command::{ActuatorCommand, ActuatorReply};
use crate::error::RigError;

use log::debug;
use serial2::SerialPort;
use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};

/// The duplex byte stream underneath a [`SerialLink`]. Reads are expected to
/// return after the port's read timeout with `TimedOut` or `WouldBlock` when
/// nothing has arrived.
pub trait Port: Read + Write {
    /// Drop everything the OS has buffered but we have not read yet.
    fn discard_input(&mut self) -> io::Result<()>;
    /// Drop everything we have written that the OS has not sent yet.
    fn discard_output(&mut self) -> io::Result<()>;
}

impl Port for SerialPort {
    fn discard_input(&mut self) -> io::Result<()> {
        self.discard_input_buffer()
    }

    fn discard_output(&mut self) -> io::Result<()> {
        self.discard_output_buffer()
    }
}

/// Open a serial port at `baud` with a short read timeout, so reads behave
/// like polls.
pub fn open_port(path: &str, baud: u32, read_timeout: Duration) -> Result<SerialPort, RigError> {
    let mut port = SerialPort::open(path, baud)?;
    port.set_read_timeout(read_timeout)?;
    Ok(port)
}

/// Fire-and-forget command link to the actuator controller. There is no
/// acknowledgement or retry; bytes are written and that is it.
pub struct SerialLink<P: Port> {
    port: P,
    pending: Vec<u8>,
}

impl<P: Port> SerialLink<P> {
    /// Wrap an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: Vec::new(),
        }
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Write one command byte.
    pub fn send(&mut self, cmd: ActuatorCommand) -> Result<(), RigError> {
        debug!("Sending {:?} ({:?})", cmd, cmd.encode() as char);
        self.send_bytes(&[cmd.encode()])
    }

    /// Write a run of commands back to back.
    pub fn send_all(&mut self, cmds: &[ActuatorCommand]) -> Result<(), RigError> {
        let bytes: Vec<u8> = cmds.iter().map(|c| c.encode()).collect();
        debug!("Sending {:?}", String::from_utf8_lossy(&bytes));
        self.send_bytes(&bytes)
    }

    /// Write raw bytes.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), RigError> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    /// Throw away anything received so far, both here and in the OS buffer.
    pub fn flush_input(&mut self) -> Result<(), RigError> {
        self.pending.clear();
        self.port.discard_input()?;
        Ok(())
    }

    /// Block until everything written has been handed to the device.
    pub fn flush_output(&mut self) -> Result<(), RigError> {
        self.port.flush()?;
        Ok(())
    }

    /// Drop any unsent output without transmitting it.
    pub fn discard_output(&mut self) -> Result<(), RigError> {
        self.port.discard_output()?;
        Ok(())
    }

    /// Number of received bytes not consumed yet. Polls the port once.
    pub fn bytes_available(&mut self) -> Result<usize, RigError> {
        self.fill()?;
        Ok(self.pending.len())
    }

    /// Block until a full line has arrived and return it without its
    /// terminator, or fail once `timeout` has passed.
    pub fn read_line(&mut self, timeout: Duration) -> Result<String, RigError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=idx).collect();
                let line = String::from_utf8_lossy(&line);
                return Ok(line.trim_end_matches(&['\r', '\n'][..]).to_owned());
            }
            if Instant::now() >= deadline {
                return Err(RigError::Timeout {
                    waiting_for: "a line from the actuator controller",
                    after: timeout,
                });
            }
            self.fill()?;
        }
    }

    /// If anything has arrived, read one reply line. Returns `None` when the
    /// input is empty or no full line shows up within `timeout`; a partial
    /// line stays pending for the next poll.
    pub fn poll_reply(&mut self, timeout: Duration) -> Result<Option<ActuatorReply>, RigError> {
        if self.bytes_available()? == 0 {
            return Ok(None);
        }
        match self.read_line(timeout) {
            Ok(line) => Ok(Some(ActuatorReply::parse(&line))),
            Err(RigError::Timeout { .. }) => {
                debug!("Partial reply pending: {:?}", String::from_utf8_lossy(&self.pending));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn fill(&mut self) -> Result<(), RigError> {
        let mut buf = [0; 64];
        match self.port.read(&mut buf) {
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
