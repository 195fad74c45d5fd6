//! Per-world tick sequencing.
//!
//! The scheduler owns the tick counter and the cadence counters for autosave
//! and eviction. [`World::tick`](crate::world::World::tick) asks it for a
//! [`TickPlan`] and runs the steps in a fixed order:
//!
//! 1. world border
//! 2. visibility update
//! 3. completion drain, pending delivery, eviction (on cadence)
//! 4. clock and weather
//! 5. full save (when the autosave counter expires)

/// Default autosave interval: five minutes at 20 ticks per second.
pub const DEFAULT_AUTOSAVE_TICKS: u64 = 20 * 60 * 5;

/// Default eviction cadence: once per second at 20 ticks per second.
pub const DEFAULT_EVICTION_TICKS: u64 = 20;

/// What started a full save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveTrigger {
    /// Autosave counter expired
    Interval,
    /// Requested through [`TickScheduler::request_save`]
    Manual,
}

/// Counter that fires every `interval` ticks. An interval of 0 never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    interval: u64,
    remaining: u64,
}

impl Countdown {
    /// Creates a counter that first fires after `interval` ticks.
    #[must_use]
    pub const fn new(interval: u64) -> Self {
        Self {
            interval,
            remaining: interval,
        }
    }

    /// Counts one tick. Returns true when the counter expires, then resets.
    pub fn tick(&mut self) -> bool {
        if self.interval == 0 {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = self.interval;
            true
        } else {
            false
        }
    }

    /// Restarts the countdown.
    pub fn reset(&mut self) {
        self.remaining = self.interval;
    }

    /// Ticks until the next expiry.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> u64 {
        self.interval
    }
}

/// Steps to run this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Run the eviction pass
    pub evict: bool,
    /// Run a full save, and why
    pub save: Option<SaveTrigger>,
}

/// Tick counter plus autosave and eviction cadence.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    tick: u64,
    autosave: Countdown,
    eviction: Countdown,
    autosave_enabled: bool,
    save_requested: bool,
}

impl TickScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub const fn new(autosave_ticks: u64, eviction_ticks: u64) -> Self {
        Self {
            tick: 0,
            autosave: Countdown::new(autosave_ticks),
            eviction: Countdown::new(eviction_ticks),
            autosave_enabled: true,
            save_requested: false,
        }
    }

    /// Starts counting from a restored tick.
    #[must_use]
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// Advances to the next tick and returns its plan.
    pub fn advance(&mut self) -> TickPlan {
        self.tick += 1;
        let evict = self.eviction.tick();
        let interval = self.autosave_enabled && self.autosave.tick();

        let save = if interval {
            self.save_requested = false;
            Some(SaveTrigger::Interval)
        } else if std::mem::take(&mut self.save_requested) {
            self.autosave.reset();
            Some(SaveTrigger::Manual)
        } else {
            None
        };

        TickPlan {
            tick: self.tick,
            evict,
            save,
        }
    }

    /// Runs a full save at the end of the next tick.
    pub fn request_save(&mut self) {
        self.save_requested = true;
    }

    /// Turns interval saves on or off. Requested saves still run.
    ///
    /// Turning autosave back on restarts the countdown.
    pub fn set_autosave(&mut self, enabled: bool) {
        if enabled && !self.autosave_enabled {
            self.autosave.reset();
        }
        self.autosave_enabled = enabled;
    }

    /// Returns true if interval saves are on.
    #[must_use]
    pub const fn autosave_enabled(&self) -> bool {
        self.autosave_enabled
    }

    /// Last tick number handed out.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Ticks until the next autosave.
    #[must_use]
    pub const fn ticks_until_autosave(&self) -> u64 {
        self.autosave.remaining()
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSAVE_TICKS, DEFAULT_EVICTION_TICKS)
    }
}
