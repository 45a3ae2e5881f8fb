//! Millisecond tick source and the timeout primitive built on it.
//!
//! The node keeps time with a free-running `u32` millisecond counter that
//! wraps after roughly 49 days. Every comparison in this module goes through
//! `wrapping_sub`, so a wait that straddles the wrap still measures the
//! right elapsed time.
//!
//! Bootloader timeouts are expressed in units of 10 ms, with the unit value
//! `0xFF` reserved for "wait forever":
//!
//! ```rust
//! use sdoboot::clock::WaitBudget;
//!
//! assert_eq!(WaitBudget::from_units(5), WaitBudget::Millis(50));
//! assert_eq!(WaitBudget::from_units(0xFF), WaitBudget::Forever);
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Milliseconds per bootloader timeout unit.
pub const TIMEOUT_UNIT_MS: u32 = 10;

/// Timeout unit value meaning "wait indefinitely".
pub const FOREVER_UNITS: u8 = 0xFF;

/// Monotonic millisecond tick source.
pub trait Clock {
    /// Current tick count in milliseconds. Wraps at `u32::MAX`.
    fn now_ms(&self) -> u32;
}

/// Wall-clock backed tick source for host builds.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Create a clock counting from now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation gives the same wrap behaviour as the hardware counter.
        self.epoch
            .elapsed()
            .as_millis() as u32
    }
}

/// Manually advanced clock.
///
/// Clones share the same counter, so a tick hook can hold one handle and
/// advance time while the channel reads from another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    /// Create a clock starting at `start` milliseconds.
    pub fn starting_at(start: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Move the clock forward by `ms`, wrapping at `u32::MAX`.
    pub fn advance(&self, ms: u32) {
        self.now
            .set(
                self.now
                    .get()
                    .wrapping_add(ms),
            );
    }

    /// Set the absolute tick count.
    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

/// How long a blocking read may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitBudget {
    /// Wait until a command arrives, however long that takes.
    Forever,
    /// Give up after this many milliseconds.
    Millis(u32),
}

impl WaitBudget {
    /// Convert a bootloader timeout in 10 ms units.
    pub fn from_units(units: u8) -> Self {
        if units == FOREVER_UNITS {
            Self::Forever
        } else {
            Self::Millis(u32::from(units) * TIMEOUT_UNIT_MS)
        }
    }

    /// Budget in milliseconds, `None` when unbounded.
    pub fn as_millis(self) -> Option<u32> {
        match self {
            Self::Forever => None,
            Self::Millis(ms) => Some(ms),
        }
    }
}

/// A started wait with a budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: u32,
    budget: WaitBudget,
}

impl Deadline {
    /// Start measuring from the clock's current tick.
    pub fn start<K: Clock + ?Sized>(clock: &K, budget: WaitBudget) -> Self {
        Self {
            start: clock.now_ms(),
            budget,
        }
    }

    /// Milliseconds since the deadline was started.
    pub fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.start)
    }

    /// Whether the budget has run out at tick `now`.
    pub fn expired(&self, now: u32) -> bool {
        match self.budget {
            WaitBudget::Forever => false,
            WaitBudget::Millis(ms) => self.elapsed(now) >= ms,
        }
    }
}

/// Periodic flags driven by the millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// Every 500 ms.
    Ms500,
    /// Every 250 ms.
    Ms250,
    /// Every 100 ms.
    Ms100,
    /// Every 50 ms.
    Ms50,
    /// Sensor polling slot, every 250 ms.
    Sensor,
    /// Every second.
    Seconds,
}

impl TimerId {
    const ALL: [Self; 6] = [
        Self::Ms500,
        Self::Ms250,
        Self::Ms100,
        Self::Ms50,
        Self::Sensor,
        Self::Seconds,
    ];

    /// Default period of this timer in milliseconds.
    pub fn period_ms(self) -> u32 {
        match self {
            Self::Ms500 => 500,
            Self::Ms250 | Self::Sensor => 250,
            Self::Ms100 => 100,
            Self::Ms50 => 50,
            Self::Seconds => MS_PER_SECOND,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

const MS_PER_SECOND: u32 = 1000;

/// Number of multiples of `period` in the tick range `(last, now]`.
fn boundaries(last: u32, now: u32, period: u32) -> u32 {
    if period == 0 {
        return 0;
    }
    if now >= last {
        now / period - last / period
    } else {
        // Tick 0 after the wrap is a boundary for every period.
        (u32::MAX / period - last / period) + 1 + now / period
    }
}

/// One-shot flags raised on period boundaries of the tick counter.
///
/// The main loop calls [`PeriodicTimers::refresh`] as often as it likes and
/// consumes due work with [`PeriodicTimers::take`]. Each slot's period can
/// be changed with [`PeriodicTimers::set_interval`]; an interval of zero
/// disables the slot. The set also counts whole seconds of uptime.
#[derive(Debug, Clone)]
pub struct PeriodicTimers {
    last: u32,
    seconds: u32,
    intervals: [u32; TimerId::ALL.len()],
    pending: [bool; TimerId::ALL.len()],
}

impl PeriodicTimers {
    /// Create the timer set with `now` as the last seen tick.
    pub fn new(now: u32) -> Self {
        Self {
            last: now,
            seconds: 0,
            intervals: TimerId::ALL.map(TimerId::period_ms),
            pending: [false; TimerId::ALL.len()],
        }
    }

    /// Raise flags for every period boundary crossed since the last refresh.
    pub fn refresh(&mut self, now: u32) {
        if now == self.last {
            return;
        }

        for id in TimerId::ALL {
            if boundaries(self.last, now, self.intervals[id.slot()]) > 0 {
                self.pending[id.slot()] = true;
            }
        }
        self.seconds = self
            .seconds
            .wrapping_add(boundaries(self.last, now, MS_PER_SECOND));

        self.last = now;
    }

    /// Return whether `id` fired, clearing the flag.
    pub fn take(&mut self, id: TimerId) -> bool {
        std::mem::take(&mut self.pending[id.slot()])
    }

    /// Change the period of `id`. Zero stops the slot from firing.
    pub fn set_interval(&mut self, id: TimerId, ms: u32) {
        self.intervals[id.slot()] = ms;
    }

    /// Current period of `id` in milliseconds.
    pub fn interval(&self, id: TimerId) -> u32 {
        self.intervals[id.slot()]
    }

    /// Whole seconds counted since the timer set was created.
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Whole minutes counted since the timer set was created.
    pub fn minutes(&self) -> u32 {
        self.seconds / 60
    }
}
