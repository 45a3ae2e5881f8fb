//! Error types for sdoboot.

use std::io;
use thiserror::Error;

use crate::sdo::abort;

/// Result type for sdoboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sdoboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No complete command arrived within the read budget.
    ///
    /// Recoverable: the bootloader core retries the read or abandons the
    /// transfer attempt.
    #[error("Timeout: no complete command after {waited_ms} ms")]
    Timeout {
        /// Milliseconds elapsed when the wait gave up.
        waited_ms: u32,
    },

    /// A fragment (or response) would land outside the buffer.
    ///
    /// Fatal for the fragment: nothing is copied and the transfer must be
    /// aborted upstream.
    #[error("Bounds violation: {len} bytes at offset {offset} exceed limit {limit}")]
    BoundsViolation {
        /// Offset the write or read was requested at.
        offset: usize,
        /// Number of bytes requested.
        len: usize,
        /// Limit that was exceeded (buffer capacity or declared total).
        limit: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Unsupported operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is the recoverable read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the error must abort the current transfer.
    pub fn is_fatal(&self) -> bool {
        !self.is_timeout()
    }

    /// SDO abort code reported to the bus master for this error.
    pub fn abort_code(&self) -> u32 {
        match self {
            Self::BoundsViolation { .. } => abort::LENGTH_TOO_HIGH,
            Self::Timeout { .. } => abort::PROTOCOL_TIMED_OUT,
            _ => abort::GENERAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_recoverable() {
        let err = Error::Timeout { waited_ms: 50 };
        assert!(err.is_timeout());
        assert!(!err.is_fatal());
        assert_eq!(err.abort_code(), abort::PROTOCOL_TIMED_OUT);
    }

    #[test]
    fn test_bounds_violation_is_fatal() {
        let err = Error::BoundsViolation {
            offset: 63,
            len: 7,
            limit: 64,
        };
        assert!(err.is_fatal());
        assert_eq!(err.abort_code(), abort::LENGTH_TOO_HIGH);
        assert_eq!(
            err.to_string(),
            "Bounds violation: 7 bytes at offset 63 exceed limit 64"
        );
    }

    #[test]
    fn test_other_errors_map_to_general_abort() {
        let err = Error::Config("bad capacity".into());
        assert_eq!(err.abort_code(), abort::GENERAL_ERROR);
    }
}
