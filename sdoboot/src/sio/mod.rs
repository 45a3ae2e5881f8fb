//! Serial input for the node's debug console.
//!
//! The UART receive path differs between hardware families, so the line
//! assembler is written against a small capability trait, [`RxSource`],
//! and the family is picked once, when the [`SerialInput`] is built:
//!
//! ```text
//! +------------------------+
//! |     SerialInput<R>     |   line assembly, editing, clean-up
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |      RxSource trait    |   clear_rx / rx_available / read_byte
//! +-----+-------------+----+
//!       |             |
//!       v             v
//! +-----+-----+ +-----+-----+
//! | MemoryRx  | | NativeRx  |
//! |  (FIFO)   | |(serialport)|
//! +-----------+ +-----------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sdoboot::sio::{MemoryRx, SerialInput};
//!
//! let mut input = SerialInput::new(MemoryRx::from_bytes(b"reset node\r"));
//! input.check_host()?;
//! assert_eq!(input.take_command().as_deref(), Some("RESETNODE"));
//! # Ok::<(), sdoboot::Error>(())
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};

/// Receive buffer size of the console.
pub const RX_BUFFER_SIZE: usize = 128;

/// Transmit buffer size of the console; a reply frame never exceeds it.
pub const TX_BUFFER_SIZE: usize = 128;

/// Marker written in front of every console reply.
pub const REPLY_PREFIX: &[u8] = b"> ";

/// Line sent when a command is not recognised.
pub const BAD_COMMAND: &[u8] = b"BAD COMMAND\r\n";

/// Control characters understood by the console.
pub mod control {
    /// End of text.
    pub const ETX: u8 = 0x03;
    /// End of transmission.
    pub const EOT: u8 = 0x04;
    /// Backspace.
    pub const BS: u8 = 0x08;
    /// Line feed.
    pub const LF: u8 = b'\n';
    /// Carriage return.
    pub const CR: u8 = b'\r';
    /// Space.
    pub const SPACE: u8 = b' ';
    /// Delete.
    pub const DEL: u8 = 0x7F;
    /// Comment marker; the rest of the line is ignored.
    pub const COMMENT: u8 = b'#';
}

/// Write one console reply: `"> "`, the text, then LF and CR.
///
/// Text that would overflow the transmit buffer is cut short. Returns the
/// number of bytes written.
pub fn reply<W: Write>(out: &mut W, text: &str) -> Result<usize> {
    let room = TX_BUFFER_SIZE - REPLY_PREFIX.len() - 2;
    let body = &text.as_bytes()[..text.len().min(room)];
    if body.len() < text.len() {
        trace!("Console reply cut to {room} bytes");
    }

    let mut frame = Vec::with_capacity(TX_BUFFER_SIZE);
    frame.extend_from_slice(REPLY_PREFIX);
    frame.extend_from_slice(body);
    frame.extend_from_slice(&[control::LF, control::CR]);
    out.write_all(&frame)?;
    out.flush()?;
    Ok(frame.len())
}

/// Serial port configuration for a native console.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Receive capability of one UART family.
pub trait RxSource {
    /// Discard whatever the hardware has buffered.
    fn clear_rx(&mut self) -> Result<()>;

    /// Number of bytes ready to read without waiting.
    fn rx_available(&mut self) -> Result<usize>;

    /// Read one buffered byte.
    fn read_byte(&mut self) -> Result<u8>;
}

/// In-memory receive FIFO.
#[derive(Debug, Clone, Default)]
pub struct MemoryRx {
    fifo: VecDeque<u8>,
}

impl MemoryRx {
    /// Create an empty FIFO.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a FIFO pre-loaded with `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            fifo: bytes
                .iter()
                .copied()
                .collect(),
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.fifo
            .extend(bytes);
    }
}

impl RxSource for MemoryRx {
    fn clear_rx(&mut self) -> Result<()> {
        self.fifo.clear();
        Ok(())
    }

    fn rx_available(&mut self) -> Result<usize> {
        Ok(self.fifo.len())
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.fifo
            .pop_front()
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "rx empty")))
    }
}

/// Line assembler for console commands.
pub struct SerialInput<R> {
    rx: R,
    buffer: Vec<u8>,
}

impl<R: RxSource> SerialInput<R> {
    /// Create an empty assembler over `rx`.
    pub fn new(rx: R) -> Self {
        Self {
            rx,
            buffer: Vec::with_capacity(RX_BUFFER_SIZE),
        }
    }

    /// Move whatever the UART has into the line buffer.
    ///
    /// Bytes beyond the buffer size are dropped; the hardware buffer is
    /// cleared after every drain. Returns the buffered length.
    pub fn check_host(&mut self) -> Result<usize> {
        let count = self.rx.rx_available()?;
        if count > 0 {
            let room = RX_BUFFER_SIZE - self.buffer.len();
            for _ in 0..count.min(room) {
                let byte = self.rx.read_byte()?;
                self.buffer.push(byte);
            }
            if count > room {
                trace!("Console buffer full, dropped {} bytes", count - room);
            }
            self.rx.clear_rx()?;
        }
        Ok(self.buffer.len())
    }

    /// Whether a line terminator (CR, LF or ETX) has arrived.
    pub fn check_ready(&self) -> bool {
        self.buffer
            .iter()
            .any(|&b| matches!(b, control::CR | control::LF | control::ETX))
    }

    /// Normalise the buffered line in place.
    ///
    /// Stops at the first terminator or comment marker, applies backspace
    /// and delete, drops whitespace and non-printables, and upper-cases
    /// ASCII letters.
    pub fn clean_buffer(&mut self) {
        let mut edited = Vec::with_capacity(self.buffer.len());
        for &byte in &self.buffer {
            match byte {
                control::COMMENT | control::ETX | control::EOT | control::LF | control::CR => break,
                control::BS | control::DEL => {
                    edited.pop();
                },
                _ => edited.push(byte),
            }
        }

        edited.retain(|&b| b > control::SPACE && b < control::DEL);
        edited.make_ascii_uppercase();
        self.buffer = edited;
    }

    /// Take the next complete command, if one has arrived.
    pub fn take_command(&mut self) -> Option<String> {
        if !self.check_ready() {
            return None;
        }
        self.clean_buffer();
        let command = String::from_utf8_lossy(&self.buffer).into_owned();
        self.clear();
        Some(command)
    }

    /// Poll the UART until a command arrives.
    ///
    /// Returns `Ok(None)` when the embedding application requests an
    /// interruption (see [`crate::set_interrupt_checker`]).
    pub fn next_command(&mut self, poll_interval: Duration) -> Result<Option<String>> {
        loop {
            self.check_host()?;
            if let Some(command) = self.take_command() {
                return Ok(Some(command));
            }
            if crate::is_interrupted_requested() {
                trace!("Console wait interrupted");
                return Ok(None);
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Report an unrecognised command on `out` and drop the buffered line.
    pub fn bad_command<W: Write>(&mut self, out: &mut W) -> Result<()> {
        out.write_all(BAD_COMMAND)?;
        out.flush()?;
        self.clear();
        Ok(())
    }

    /// Drop the buffered line.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// The receive source.
    pub fn rx_mut(&mut self) -> &mut R {
        &mut self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(bytes: &[u8]) -> SerialInput<MemoryRx> {
        let mut input = SerialInput::new(MemoryRx::from_bytes(bytes));
        input.check_host().unwrap();
        input
    }

    #[test]
    fn test_check_host_drains_and_clears_rx() {
        let mut input = SerialInput::new(MemoryRx::from_bytes(b"abc"));
        assert_eq!(input.check_host().unwrap(), 3);
        assert_eq!(input.rx_mut().rx_available().unwrap(), 0);
        assert_eq!(input.buffered(), b"abc");

        input
            .rx_mut()
            .push(b"de");
        assert_eq!(input.check_host().unwrap(), 5);
    }

    #[test]
    fn test_check_host_caps_at_buffer_size() {
        let mut input = SerialInput::new(MemoryRx::from_bytes(&[b'x'; RX_BUFFER_SIZE + 10]));
        assert_eq!(input.check_host().unwrap(), RX_BUFFER_SIZE);
        assert_eq!(input.rx_mut().rx_available().unwrap(), 0);
    }

    #[test]
    fn test_ready_on_any_terminator() {
        assert!(!input(b"status").check_ready());
        assert!(input(b"status\r").check_ready());
        assert!(input(b"status\n").check_ready());
        assert!(input(&[b's', control::ETX]).check_ready());
    }

    #[test]
    fn test_clean_uppercases_and_drops_spaces() {
        let mut input = input(b"  set id 23\r\n");
        input.clean_buffer();
        assert_eq!(input.buffered(), b"SETID23");
    }

    #[test]
    fn test_clean_applies_backspace() {
        let mut input = input(&[b'l', b'e', b'x', control::BS, b'd', control::DEL, b'd', b'\r']);
        input.clean_buffer();
        assert_eq!(input.buffered(), b"LED");
    }

    #[test]
    fn test_clean_stops_at_comment() {
        let mut input = input(b"boot # jump to loader\r");
        input.clean_buffer();
        assert_eq!(input.buffered(), b"BOOT");
    }

    #[test]
    fn test_take_command_consumes_line() {
        let mut input = input(b"ver");
        assert_eq!(input.take_command(), None);

        input
            .rx_mut()
            .push(b"sion\r");
        input.check_host().unwrap();
        assert_eq!(input.take_command().as_deref(), Some("VERSION"));
        assert!(input.buffered().is_empty());
    }

    #[test]
    fn test_next_command_returns_buffered_line() {
        let mut input = SerialInput::new(MemoryRx::from_bytes(b"id?\n"));
        let command = input
            .next_command(Duration::from_millis(1))
            .unwrap();
        assert_eq!(command.as_deref(), Some("ID?"));
    }

    #[test]
    fn test_reply_frames_text() {
        let mut out = Vec::new();
        assert_eq!(reply(&mut out, "ID 23").unwrap(), 9);
        assert_eq!(out, b"> ID 23\n\r");
    }

    #[test]
    fn test_reply_fits_transmit_buffer() {
        let mut out = Vec::new();
        let long = "x".repeat(200);
        assert_eq!(reply(&mut out, &long).unwrap(), TX_BUFFER_SIZE);
        assert_eq!(out.len(), TX_BUFFER_SIZE);
        assert!(out.starts_with(b"> xxx"));
        assert!(out.ends_with(b"x\n\r"));
    }

    #[test]
    fn test_bad_command_reports_and_clears_line() {
        let mut input = input(b"bogus stuff");
        let mut out = Vec::new();
        input
            .bad_command(&mut out)
            .unwrap();
        assert_eq!(out, b"BAD COMMAND\r\n");
        assert!(input.buffered().is_empty());

        input
            .rx_mut()
            .push(b"ver\r");
        input.check_host().unwrap();
        assert_eq!(input.take_command().as_deref(), Some("VER"));
    }

    #[test]
    fn test_memory_rx_empty_read_fails() {
        let mut rx = MemoryRx::new();
        assert!(rx.read_byte().is_err());
    }
}
