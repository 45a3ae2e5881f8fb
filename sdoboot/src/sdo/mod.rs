//! Segmented SDO transfer support.
//!
//! A CANopen master moves objects larger than four bytes with segmented
//! SDO transfers: after an initiate exchange, the object travels in
//! segments of at most seven bytes each. The protocol stack tracks the
//! transfer with a cursor and calls the object's handler once per segment.
//!
//! ```text
//! +---------+-----------------------------------+
//! | command |        segment data (<= 7)        |
//! +---------+-----------------------------------+
//! |    1    |                 7                 |
//! +---------+-----------------------------------+
//! ```
//!
//! This module holds the handler for the bootloader's program-data object;
//! see [`SegmentAdapter`].

mod adapter;

pub use adapter::SegmentAdapter;

/// Maximum payload of one SDO segment.
pub const MAX_SEGMENT_LEN: usize = 7;

/// Object index of the program-data (firmware image) slot.
pub const PROGRAM_DATA_INDEX: u16 = 0x1F50;

/// Sub-index of the program-data slot.
pub const PROGRAM_DATA_SUBINDEX: u8 = 0x01;

/// SDO abort codes (CiA 301).
pub mod abort {
    /// SDO protocol timed out.
    pub const PROTOCOL_TIMED_OUT: u32 = 0x0504_0000;
    /// Out of memory.
    pub const OUT_OF_MEMORY: u32 = 0x0504_0005;
    /// Data type does not match, length of service parameter too high.
    pub const LENGTH_TOO_HIGH: u32 = 0x0607_0012;
    /// General error.
    pub const GENERAL_ERROR: u32 = 0x0800_0000;
}

/// Which way the protocol stack is moving data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Master writes to the node (command bytes).
    Download,
    /// Master reads from the node (response bytes).
    Upload,
    /// Master aborted the transfer.
    Abort,
}

/// Non-error outcome of a handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoStatus {
    /// Keep the transfer going.
    Continue,
    /// Not handled here; the stack runs its generic path.
    NotHandled,
}

/// Progress of one segmented transfer.
///
/// Owned by the protocol stack and passed in on every call. The transfer
/// is complete exactly when `position == total_length`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferCursor {
    /// Bytes transferred so far.
    pub position: u32,
    /// Declared size of the object.
    pub total_length: u32,
}

impl TransferCursor {
    /// Create a cursor.
    pub fn new(position: u32, total_length: u32) -> Self {
        Self {
            position,
            total_length,
        }
    }

    /// Whether every declared byte has been transferred.
    pub fn is_complete(&self) -> bool {
        self.position == self.total_length
    }

    /// Bytes left to transfer.
    pub fn remaining(&self) -> u32 {
        self.total_length
            .saturating_sub(self.position)
    }
}

/// One segment's payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    data: [u8; MAX_SEGMENT_LEN],
    len: u8,
}

impl Segment {
    /// An empty segment, used as the output slot for uploads.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy `bytes` into a segment. `None` if longer than seven bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_SEGMENT_LEN {
            return None;
        }
        let mut segment = Self::default();
        segment.fill(bytes);
        Some(segment)
    }

    /// Payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn fill(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= MAX_SEGMENT_LEN);
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_from_slice_caps_at_seven() {
        let seg = Segment::from_slice(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(seg.len(), 7);
        assert_eq!(seg.as_slice(), &[1, 2, 3, 4, 5, 6, 7]);

        assert!(Segment::from_slice(&[0; 8]).is_none());
        assert!(
            Segment::from_slice(&[])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_cursor_completion() {
        let mut cursor = TransferCursor::new(0, 14);
        assert!(!cursor.is_complete());
        assert_eq!(cursor.remaining(), 14);

        cursor.position = 14;
        assert!(cursor.is_complete());
        assert_eq!(cursor.remaining(), 0);

        assert!(TransferCursor::default().is_complete());
    }
}
