//! Bootloader communication channel.
//!
//! [`CommChannel`] is what the bootloader core talks to: it reads one
//! complete command at a time and queues one response at a time. The bytes
//! themselves travel over the fieldbus in small segments, which the
//! [`SegmentAdapter`](crate::sdo::SegmentAdapter) copies in and out of the
//! channel's [`Mailbox`].
//!
//! ## Ownership
//!
//! ```text
//!            +-------------------- Mailbox --------------------+
//!  adapter   |  command  [..C]   written by adapter            |  channel
//!  -------->  |                   cleared by channel (read)     | -------->
//!            |  response [..C]   written by channel (write)    |  bootloader
//!  <--------  |                   read by adapter (upload)      | <--------
//!            +-------------------------------------------------+
//! ```
//!
//! Each buffer has exactly one writer, so the fragment-delivery context
//! and the waiting bootloader core never race on the same bytes.
//!
//! ## Cooperative wait
//!
//! [`CommChannel::read`] does not block the node. It repeatedly calls
//! [`NodeHooks::app_run`] with the mailbox until a command is complete or
//! the budget runs out. The tick hook is where the protocol stack runs,
//! so it is also where fragments are delivered; skipping it would stall
//! the very transfer the read is waiting for.

use log::{debug, trace, warn};

use crate::clock::{Clock, Deadline, WaitBudget};
use crate::error::{Error, Result};

/// Size of the bootloader command buffer on the reference node.
pub const DEFAULT_CAPACITY: usize = 300;

/// Response byte meaning "no response yet / not acknowledged".
pub const NOT_ACKNOWLEDGED: u8 = 0xFF;

/// Command and response buffers shared by the channel and the adapter.
///
/// Both buffers have the same fixed capacity; this is the single place
/// that capacity is defined.
#[derive(Debug, Clone)]
pub struct Mailbox {
    command: Box<[u8]>,
    command_len: usize,
    response: Box<[u8]>,
    response_len: usize,
}

impl Mailbox {
    /// Create a mailbox whose buffers hold `capacity` bytes each.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("mailbox capacity must be at least 1".into()));
        }

        Ok(Self {
            command: vec![0u8; capacity].into_boxed_slice(),
            command_len: 0,
            response: vec![0u8; capacity].into_boxed_slice(),
            response_len: 0,
        })
    }

    /// Capacity of each buffer.
    pub fn capacity(&self) -> usize {
        self.command.len()
    }

    /// The complete pending command, empty while a download is in flight.
    pub fn command(&self) -> &[u8] {
        &self.command[..self.command_len]
    }

    /// Logical length of the pending command.
    pub fn command_len(&self) -> usize {
        self.command_len
    }

    /// Whether a complete command is waiting to be read.
    pub fn command_ready(&self) -> bool {
        self.command_len > 0
    }

    /// The queued response.
    pub fn response(&self) -> &[u8] {
        &self.response[..self.response_len]
    }

    /// Logical length of the queued response.
    pub fn response_len(&self) -> usize {
        self.response_len
    }

    /// Whole command buffer regardless of logical length.
    #[cfg(test)]
    pub(crate) fn raw_command(&self) -> &[u8] {
        &self.command
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        let limit = self.capacity();
        match offset.checked_add(len) {
            Some(end) if end <= limit => Ok(()),
            _ => Err(Error::BoundsViolation { offset, len, limit }),
        }
    }

    // Adapter side: writes the command buffer, reads the response buffer.

    pub(crate) fn store_fragment(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len())?;
        self.command[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn set_command_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.command_len = len;
    }

    pub(crate) fn response_window(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check_bounds(offset, len)?;
        Ok(&self.response[offset..offset + len])
    }

    // Channel side: writes the response buffer, clears the command buffer.

    pub(crate) fn queue_response(&mut self, data: &[u8]) -> Result<usize> {
        self.check_bounds(0, data.len())?;
        self.response[..data.len()].copy_from_slice(data);
        self.response_len = data.len();
        Ok(data.len())
    }

    fn arm_not_acknowledged(&mut self) {
        self.response[0] = NOT_ACKNOWLEDGED;
        self.response_len = 1;
    }

    fn clear_response(&mut self) {
        self.response_len = 0;
    }

    fn take_command(&mut self, out: &mut [u8]) -> usize {
        let count = self
            .command_len
            .min(out.len());
        out[..count].copy_from_slice(&self.command[..count]);
        self.command_len = 0;
        count
    }
}

/// Device collaborators the channel calls out to.
///
/// Everything except the tick hook defaults to a no-op, since most of the
/// lifecycle calls only matter on real hardware.
pub trait NodeHooks {
    /// Bring up the bus controller and registers.
    fn init_hardware(&mut self) {}

    /// Initialise the application layer (protocol stack, object dictionary).
    fn app_init(&mut self) {}

    /// Mask the interrupt sources that feed the command buffer.
    fn disable_interrupt_sources(&mut self) {}

    /// Run one pass of the application main loop.
    ///
    /// Called on every iteration of a waiting [`CommChannel::read`]. Must
    /// return promptly. Fragment delivery happens here, through the
    /// mailbox handed in.
    fn app_run(&mut self, mailbox: &mut Mailbox);
}

/// Adapter turning a closure into a tick-only [`NodeHooks`].
pub struct TickFn<F>(pub F);

impl<F> NodeHooks for TickFn<F>
where
    F: FnMut(&mut Mailbox),
{
    fn app_run(&mut self, mailbox: &mut Mailbox) {
        (self.0)(mailbox);
    }
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Session {
    /// Not started, or stopped.
    #[default]
    Stopped,
    /// Between `start()` and `stop()`.
    Started,
}

/// Communication channel between the fieldbus adapter and the bootloader.
pub struct CommChannel<H, K> {
    mailbox: Mailbox,
    hooks: H,
    clock: K,
    session: Session,
    resets: u32,
}

impl<H: NodeHooks, K: Clock> CommChannel<H, K> {
    /// Create a stopped channel with buffers of `capacity` bytes.
    pub fn new(capacity: usize, hooks: H, clock: K) -> Result<Self> {
        Ok(Self {
            mailbox: Mailbox::new(capacity)?,
            hooks,
            clock,
            session: Session::Stopped,
            resets: 0,
        })
    }

    /// Start the channel.
    ///
    /// Brings up the hardware and application, then arms the
    /// not-acknowledged response so an early upload reads `[0xFF]`.
    pub fn start(&mut self) {
        self.hooks.init_hardware();
        self.hooks.app_init();
        self.mailbox.arm_not_acknowledged();
        self.session = Session::Started;
        debug!(
            "Channel started (capacity {} bytes)",
            self.mailbox.capacity()
        );
    }

    /// Stop the channel. Buffers are left as they are.
    pub fn stop(&mut self) {
        self.hooks.disable_interrupt_sources();
        self.session = Session::Stopped;
        debug!("Channel stopped");
    }

    /// Drop the queued response after a corrupt or abandoned command.
    ///
    /// Only the response length is cleared. A partially downloaded command
    /// stays in the command buffer, so the next download must restart its
    /// cursor at position 0.
    pub fn reset(&mut self) {
        self.mailbox.clear_response();
        self.resets = self.resets.wrapping_add(1);
        debug!("Channel reset (#{})", self.resets);
    }

    /// Queue a response for upload. Returns the number of bytes queued.
    ///
    /// Queuing is all that happens here; the host pulls the bytes later
    /// through the adapter's upload path.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let count = self.mailbox.queue_response(data)?;
        trace!("Queued {count}-byte response");
        Ok(count)
    }

    /// Wait for a complete command and copy it into `buf`.
    ///
    /// Returns the number of bytes copied. On success the command buffer is
    /// emptied and the response is re-armed to not-acknowledged. On
    /// [`Error::Timeout`] nothing is touched.
    pub fn read(&mut self, buf: &mut [u8], budget: WaitBudget) -> Result<usize> {
        let deadline = Deadline::start(&self.clock, budget);
        let mut polls: u32 = 0;

        loop {
            self.hooks.app_run(&mut self.mailbox);
            polls = polls.wrapping_add(1);

            if self.mailbox.command_ready() {
                let pending = self.mailbox.command_len();
                if pending > buf.len() {
                    warn!(
                        "Command of {pending} bytes truncated to {} byte read buffer",
                        buf.len()
                    );
                }
                let count = self.mailbox.take_command(buf);
                self.mailbox.arm_not_acknowledged();
                trace!("Read {count}-byte command after {polls} polls");
                return Ok(count);
            }

            let now = self.clock.now_ms();
            if deadline.expired(now) {
                let waited_ms = deadline.elapsed(now);
                debug!("Read timed out after {waited_ms} ms ({polls} polls)");
                return Err(Error::Timeout { waited_ms });
            }
        }
    }

    /// [`CommChannel::read`] with a timeout in 10 ms units (`0xFF` = forever).
    pub fn read_units(&mut self, buf: &mut [u8], timeout_units: u8) -> Result<usize> {
        self.read(buf, WaitBudget::from_units(timeout_units))
    }

    /// Buffer capacity.
    pub fn capacity(&self) -> usize {
        self.mailbox.capacity()
    }

    /// Current lifecycle state.
    pub fn session(&self) -> Session {
        self.session
    }

    /// Number of resets since creation.
    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Shared buffers.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Shared buffers, for delivering fragments outside a read.
    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    /// Device hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Device hooks, mutably.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Hooks and buffers at once, for driving a transfer between reads.
    pub fn parts_mut(&mut self) -> (&mut H, &mut Mailbox) {
        (&mut self.hooks, &mut self.mailbox)
    }
}
