//! # sdoboot
//!
//! Bootloader communication channel over CANopen SDO.
//!
//! A node running a bootloader receives its commands from a CAN bus master
//! as segmented SDO downloads on a single program-data object, and returns
//! its responses as SDO uploads of the same object. This crate provides the
//! node side of that exchange:
//!
//! - [`Mailbox`]: the shared command and response buffers
//! - [`SegmentAdapter`]: reassembly of download segments and slicing of
//!   upload segments against a transfer cursor
//! - [`CommChannel`]: the start/stop/reset/write/read surface a bootloader
//!   core drives, with a tick-driven, wrap-safe read timeout
//! - [`SdoClient`]: an emulated bus master for host-side runs and tests
//! - [`SerialInput`]: the debug console line assembler
//! - [`NodeId`]: node addressing from DIP switches
//!
//! ## Features
//!
//! - `native` (default): serial console input via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust
//! use sdoboot::{CommChannel, ManualClock, SdoClient, WaitBudget};
//!
//! let mut channel = CommChannel::new(64, SdoClient::new(), ManualClock::default())?;
//! channel.start();
//!
//! let (client, mailbox) = channel.parts_mut();
//! client.begin_download(mailbox, b"\x01\x38\x00")?;
//!
//! let mut command = [0u8; 64];
//! let n = channel.read(&mut command, WaitBudget::Forever)?;
//! assert_eq!(&command[..n], b"\x01\x38\x00");
//!
//! channel.write(b"\x00")?;
//! channel.stop();
//! # Ok::<(), sdoboot::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod channel;
pub mod clock;
pub mod error;
pub mod host;
pub mod node;
pub mod sdo;
pub mod sio;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use sio::native::{NativeRx, list_ports};
pub use {
    channel::{CommChannel, DEFAULT_CAPACITY, Mailbox, NOT_ACKNOWLEDGED, NodeHooks, Session, TickFn},
    clock::{Clock, Deadline, ManualClock, PeriodicTimers, SystemClock, TimerId, WaitBudget},
    error::{Error, Result},
    host::{ClientStep, SdoClient, decode_ack, encode_ack},
    node::NodeId,
    sdo::{Direction, SdoStatus, Segment, SegmentAdapter, TransferCursor},
    sio::{MemoryRx, PortInfo, RxSource, SerialConfig, SerialInput, reply},
};
