//! Host-side emulation of the CANopen master.
//!
//! [`SdoClient`] plays the bus master's part of a segmented transfer
//! against a node's [`Mailbox`]: it asks for the object size, then feeds
//! the command one segment per call, and later pulls the response back.
//! Because it delivers exactly one segment per [`NodeHooks::app_run`], it
//! can stand in for the protocol stack inside
//! [`CommChannel::read`](crate::channel::CommChannel::read).
//!
//! The acknowledgement helpers model the reply of a minimal bootloader core
//! for loopback runs:
//!
//! ```text
//! +--------+-----------------+
//! | status | command length  |
//! +--------+-----------------+
//! |   1    |   2 (LE u16)    |
//! +--------+-----------------+
//! ```

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};

use crate::channel::{Mailbox, NodeHooks};
use crate::error::{Error, Result};
use crate::sdo::{Direction, MAX_SEGMENT_LEN, Segment, SegmentAdapter, TransferCursor};

/// Acknowledgement status: command accepted.
pub const ACK_OK: u8 = 0x00;

/// Length of an encoded acknowledgement.
pub const ACK_LEN: usize = 3;

/// Outcome of one [`SdoClient::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStep {
    /// No download in progress.
    Idle,
    /// One segment delivered, more to come.
    Sent {
        /// Cursor position after the segment.
        position: u32,
        /// Declared command length.
        total: u32,
    },
    /// The final segment was delivered.
    Completed {
        /// Command length.
        total: u32,
    },
}

/// Emulated SDO master for the program-data object.
#[derive(Debug)]
pub struct SdoClient {
    adapter: SegmentAdapter,
    fragment_size: usize,
    payload: Vec<u8>,
    cursor: TransferCursor,
    active: bool,
    segments_sent: u64,
    last_error: Option<Error>,
}

impl Default for SdoClient {
    fn default() -> Self {
        Self {
            adapter: SegmentAdapter::default(),
            fragment_size: MAX_SEGMENT_LEN,
            payload: Vec::new(),
            cursor: TransferCursor::default(),
            active: false,
            segments_sent: 0,
            last_error: None,
        }
    }
}

impl SdoClient {
    /// Client sending full seven-byte segments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client sending segments of `fragment_size` bytes (1..=7).
    pub fn with_fragment_size(fragment_size: usize) -> Result<Self> {
        if !(1..=MAX_SEGMENT_LEN).contains(&fragment_size) {
            return Err(Error::Config(format!(
                "fragment size {fragment_size} outside 1..={MAX_SEGMENT_LEN}"
            )));
        }
        Ok(Self {
            fragment_size,
            ..Self::default()
        })
    }

    /// Start a download of `payload`.
    ///
    /// Queries the node's maximum object size first and refuses payloads
    /// that cannot fit.
    pub fn begin_download(&mut self, mailbox: &Mailbox, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::Unsupported("zero-length download".into()));
        }

        let mut query = TransferCursor::default();
        self.adapter
            .size_query(mailbox, &mut query, Direction::Download);
        let limit = query.total_length as usize;
        if payload.len() > limit {
            return Err(Error::BoundsViolation {
                offset: 0,
                len: payload.len(),
                limit,
            });
        }

        self.payload.clear();
        self.payload
            .extend_from_slice(payload);
        self.cursor = TransferCursor::new(0, payload.len() as u32);
        self.active = true;
        debug!("Download of {} bytes started", payload.len());
        Ok(())
    }

    /// Deliver the next download segment.
    pub fn step(&mut self, mailbox: &mut Mailbox) -> Result<ClientStep> {
        if !self.active {
            return Ok(ClientStep::Idle);
        }

        let start = self.cursor.position as usize;
        let end = (start + self.fragment_size).min(self.payload.len());
        let mut segment = Segment::from_slice(&self.payload[start..end])
            .ok_or_else(|| Error::Config("segment larger than seven bytes".into()))?;

        if let Err(err) = self.adapter.handle(
            mailbox,
            &mut self.cursor,
            Some(&mut segment),
            Direction::Download,
        ) {
            self.active = false;
            return Err(err);
        }
        self.segments_sent += 1;

        if self.cursor.is_complete() {
            self.active = false;
            trace!("Download complete after {} segments", self.segments_sent);
            Ok(ClientStep::Completed {
                total: self.cursor.total_length,
            })
        } else {
            Ok(ClientStep::Sent {
                position: self.cursor.position,
                total: self.cursor.total_length,
            })
        }
    }

    /// Download `payload` completely, outside any channel read.
    pub fn download(&mut self, mailbox: &mut Mailbox, payload: &[u8]) -> Result<()> {
        self.begin_download(mailbox, payload)?;
        while !matches!(self.step(mailbox)?, ClientStep::Completed { .. }) {}
        Ok(())
    }

    /// Upload the queued response.
    pub fn upload(&mut self, mailbox: &mut Mailbox) -> Result<Vec<u8>> {
        let mut cursor = TransferCursor::default();
        self.adapter
            .handle(mailbox, &mut cursor, None, Direction::Upload)?;

        let mut response = Vec::with_capacity(cursor.total_length as usize);
        while !cursor.is_complete() {
            let mut segment = Segment::empty();
            self.adapter.handle(
                mailbox,
                &mut cursor,
                Some(&mut segment),
                Direction::Upload,
            )?;
            self.segments_sent += 1;
            response.extend_from_slice(segment.as_slice());
        }
        Ok(response)
    }

    /// Whether no download is in progress.
    pub fn is_idle(&self) -> bool {
        !self.active
    }

    /// Segments moved in either direction so far.
    pub fn segments_sent(&self) -> u64 {
        self.segments_sent
    }

    /// Error raised while delivering from the tick hook, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error
            .take()
    }
}

impl NodeHooks for SdoClient {
    fn app_run(&mut self, mailbox: &mut Mailbox) {
        if let Err(err) = self.step(mailbox) {
            debug!("Segment rejected: {err}");
            self.last_error = Some(err);
        }
    }
}

/// Encode an acknowledgement for a command of `command_len` bytes.
pub fn encode_ack(status: u8, command_len: usize) -> Result<Vec<u8>> {
    let len = u16::try_from(command_len).map_err(|_| Error::BoundsViolation {
        offset: 0,
        len: command_len,
        limit: usize::from(u16::MAX),
    })?;

    let mut ack = Vec::with_capacity(ACK_LEN);
    ack.write_u8(status)?;
    ack.write_u16::<LittleEndian>(len)?;
    Ok(ack)
}

/// Decode an acknowledgement into `(status, command_len)`.
pub fn decode_ack(bytes: &[u8]) -> Result<(u8, u16)> {
    let mut reader = Cursor::new(bytes);
    let status = reader.read_u8()?;
    let len = reader.read_u16::<LittleEndian>()?;
    Ok((status, len))
}
