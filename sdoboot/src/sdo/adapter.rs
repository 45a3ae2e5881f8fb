//! Program-data object handler.
//!
//! Bridges segmented SDO transfers on the program-data object to the
//! bootloader [`Mailbox`]:
//!
//! - **download** segments are reassembled into the command buffer;
//! - **upload** segments are sliced out of the response buffer;
//! - **size queries** (no segment) report the object length.
//!
//! The command length doubles as the "command ready" flag that
//! [`CommChannel::read`](crate::channel::CommChannel::read) polls, so it is
//! only ever set in the one step where the download cursor reaches the
//! declared total. Until then it stays at zero.
//!
//! The mailbox holds one command. A new download must start at position 0
//! and only after the previous command has been read; a channel reset does
//! not discard a half-received command.

use log::{trace, warn};

use super::{Direction, MAX_SEGMENT_LEN, SdoStatus, Segment, TransferCursor};
use crate::channel::Mailbox;
use crate::error::{Error, Result};

/// Segmented transfer handler for the program-data object.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentAdapter;

impl SegmentAdapter {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }

    /// Handle one call from the protocol stack.
    ///
    /// `segment` is `None` for a size query. For downloads it carries the
    /// received bytes; for uploads it is filled with the bytes to send.
    pub fn handle(
        &self,
        mailbox: &mut Mailbox,
        cursor: &mut TransferCursor,
        segment: Option<&mut Segment>,
        direction: Direction,
    ) -> Result<SdoStatus> {
        match (direction, segment) {
            (Direction::Abort, _) => {
                trace!("Abort at {}/{}", cursor.position, cursor.total_length);
                Ok(SdoStatus::NotHandled)
            },
            (direction, None) => Ok(self.size_query(mailbox, cursor, direction)),
            (Direction::Download, Some(segment)) => {
                self.download(mailbox, cursor, segment)?;
                Ok(SdoStatus::Continue)
            },
            (Direction::Upload, Some(segment)) => {
                self.upload(mailbox, cursor, segment)?;
                Ok(SdoStatus::Continue)
            },
        }
    }

    /// Report the object size in `cursor.total_length`.
    ///
    /// Downloads may be up to the full buffer; uploads are as long as the
    /// queued response.
    pub fn size_query(
        &self,
        mailbox: &Mailbox,
        cursor: &mut TransferCursor,
        direction: Direction,
    ) -> SdoStatus {
        let total = match direction {
            Direction::Download => mailbox.capacity(),
            Direction::Upload => mailbox.response_len(),
            Direction::Abort => return SdoStatus::NotHandled,
        };
        cursor.total_length = total as u32;
        trace!("{direction:?} size query: {total} bytes");
        SdoStatus::Continue
    }

    /// Store one download segment at the cursor and advance it.
    ///
    /// Fails with [`Error::BoundsViolation`] when the segment would run past
    /// the buffer or past the declared total. Nothing is copied and the
    /// cursor is left as it was in that case.
    pub fn download(
        &self,
        mailbox: &mut Mailbox,
        cursor: &mut TransferCursor,
        segment: &Segment,
    ) -> Result<()> {
        debug_assert!(
            cursor.position <= cursor.total_length,
            "cursor past end: {cursor:?}"
        );

        let offset = cursor.position as usize;
        let data = segment.as_slice();
        let total = cursor.total_length as usize;

        if offset + data.len() > total {
            return Err(Error::BoundsViolation {
                offset,
                len: data.len(),
                limit: total,
            });
        }

        if offset == 0 && mailbox.command_ready() {
            warn!(
                "New download started before the pending {}-byte command was read; discarding it",
                mailbox.command_len()
            );
        }

        mailbox.store_fragment(offset, data)?;
        cursor.position += data.len() as u32;

        mailbox.set_command_len(0);
        if cursor.is_complete() {
            mailbox.set_command_len(total);
            trace!("Command complete: {total} bytes");
        } else {
            trace!("Download {}/{}", cursor.position, total);
        }

        Ok(())
    }

    /// Fill `segment` with the next upload bytes and advance the cursor.
    ///
    /// Segments are seven bytes until the last one, which carries what is
    /// left. The caller knows the upload is done when the cursor is
    /// complete.
    pub fn upload(
        &self,
        mailbox: &Mailbox,
        cursor: &mut TransferCursor,
        segment: &mut Segment,
    ) -> Result<()> {
        let len = (cursor.remaining() as usize).min(MAX_SEGMENT_LEN);
        let offset = cursor.position as usize;

        let window = mailbox.response_window(offset, len)?;
        segment.fill(window);
        cursor.position += len as u32;

        trace!("Upload {}/{}", cursor.position, cursor.total_length);
        Ok(())
    }
}
