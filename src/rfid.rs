//! Reads tags off the RFID reader's serial port.
//!
//! The reader frames every tag as `0x02 <ascii characters> 0x03`. Anything
//! outside a frame is noise and gets dropped. A second `0x02` inside a frame
//! restarts the tag.

use crate::error::RigError;

use log::debug;
use std::{
    io::{self, Read},
    time::{Duration, Instant},
};

/// Start of text, opens a tag.
pub const TAG_START: u8 = 0x02;
/// End of text, closes a tag.
pub const TAG_END: u8 = 0x03;

/// An iterator over the tags arriving on a byte stream. `next()` blocks until
/// a whole tag has arrived, and ends when the stream does.
pub struct RfidListener<R: Read> {
    reader: R,
    partial: Option<(String, Instant)>,
    tag_timeout: Option<Duration>,
}

impl<R: Read> RfidListener<R> {
    /// Listen on `reader`. Without a tag timeout, a tag that is opened but never
    /// closed blocks forever.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            partial: None,
            tag_timeout: None,
        }
    }

    /// Give up on a half-received tag after `timeout`, yielding
    /// [`RigError::Timeout`] for it.
    pub fn with_tag_timeout(self, timeout: Duration) -> Self {
        Self {
            tag_timeout: Some(timeout),
            ..self
        }
    }

    /// Borrow the underlying reader, e.g. to discard its buffers.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Forget any partially received tag.
    pub fn reset(&mut self) {
        self.partial = None;
    }

    fn feed(&mut self, byte: u8) -> Option<String> {
        match byte {
            TAG_START => {
                self.partial = Some((String::new(), Instant::now()));
                None
            }
            TAG_END => self.partial.take().map(|(tag, _)| tag),
            b => {
                if let Some((tag, _)) = self.partial.as_mut() {
                    tag.push(b as char);
                }
                None
            }
        }
    }

    fn stale(&self) -> Option<Duration> {
        match (&self.partial, self.tag_timeout) {
            (Some((_, started)), Some(timeout)) if started.elapsed() >= timeout => Some(timeout),
            _ => None,
        }
    }
}

impl<R: Read> Iterator for RfidListener<R> {
    type Item = Result<String, RigError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut byte = [0u8; 1];
        loop {
            if let Some(after) = self.stale() {
                self.partial = None;
                return Some(Err(RigError::Timeout {
                    waiting_for: "the end of an RFID tag",
                    after,
                }));
            }
            match self.reader.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => {
                    if let Some(tag) = self.feed(byte[0]) {
                        debug!("Read RFID tag {:?}", tag);
                        return Some(Ok(tag));
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Trim a tag to the length the profiles store.
pub fn truncate_tag(tag: &str, len: usize) -> String {
    tag.chars().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPort;
    use std::{io::Cursor, sync::mpsc, thread};

    #[test]
    fn single_tag() {
        let mut listener = RfidListener::new(Cursor::new(b"\x02ABC123\x03".to_vec()));
        assert_eq!(listener.next().unwrap().unwrap(), "ABC123");
        assert!(listener.next().is_none());
    }

    #[test]
    fn noise_outside_frames_is_dropped() {
        let bytes = b"xx\x02ONE\x03\r\nnoise\x02TWO\x03yy".to_vec();
        let tags: Vec<String> = RfidListener::new(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(tags, vec!["ONE", "TWO"]);
    }

    #[test]
    fn restart_marker_discards_partial() {
        let bytes = b"\x02BROK\x02WHOLE\x03".to_vec();
        let mut listener = RfidListener::new(Cursor::new(bytes));
        assert_eq!(listener.next().unwrap().unwrap(), "WHOLE");
    }

    #[test]
    fn unterminated_tag_never_returns() {
        let port = MockPort::new();
        port.push_input(b"\x02ABC");
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let mut listener = RfidListener::new(port);
            let _ = tx.send(listener.next());
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn unterminated_tag_times_out_when_asked() {
        let port = MockPort::new();
        port.push_input(b"\x02ABC");
        let mut listener = RfidListener::new(port).with_tag_timeout(Duration::from_millis(30));

        assert!(matches!(
            listener.next(),
            Some(Err(RigError::Timeout { .. }))
        ));
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_tag("0A00B1C2D3E4FF\r", 12), "0A00B1C2D3E4");
        assert_eq!(truncate_tag("SHORT", 12), "SHORT");
    }
}
