//! Fixed-rate tick timing.
//!
//! Each world thread owns a [`TickTimer`]. Ticks are scheduled against
//! absolute deadlines; a tick that overruns its budget is not made up by
//! running extra ticks.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Deadline-based tick timer.
#[derive(Debug)]
pub struct TickTimer {
    /// Target ticks per second
    tick_rate: u32,
    /// Time budget per tick
    budget: Duration,
    /// When the next tick should start
    next_deadline: Instant,
    /// Ticks that ran past their budget
    overruns: u64,
    /// Recent tick durations for averaging
    durations: VecDeque<Duration>,
    /// Maximum samples for averaging
    max_samples: usize,
}

impl TickTimer {
    /// Create a timer for `tick_rate` ticks per second.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            budget: Duration::from_secs_f64(1.0 / f64::from(tick_rate)),
            next_deadline: Instant::now(),
            overruns: 0,
            durations: VecDeque::with_capacity(100),
            max_samples: 100,
        }
    }

    /// Sleeps until the next tick is due.
    ///
    /// Returns how far behind schedule the timer was. When behind by more than
    /// a full budget, the schedule restarts from now.
    pub fn wait_next(&mut self) -> Duration {
        let now = Instant::now();
        if now < self.next_deadline {
            std::thread::sleep(self.next_deadline - now);
            self.next_deadline += self.budget;
            return Duration::ZERO;
        }

        let behind = now - self.next_deadline;
        if behind > self.budget {
            self.next_deadline = now + self.budget;
        } else {
            self.next_deadline += self.budget;
        }
        behind
    }

    /// Records how long a tick took.
    pub fn record(&mut self, duration: Duration) {
        if duration > self.budget {
            self.overruns += 1;
        }
        self.durations.push_back(duration);
        if self.durations.len() > self.max_samples {
            self.durations.pop_front();
        }
    }

    /// Average milliseconds per tick over recent ticks.
    #[must_use]
    pub fn average_mspt(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        let total: Duration = self.durations.iter().sum();
        total.as_secs_f64() * 1000.0 / self.durations.len() as f64
    }

    /// Ticks per second the world can currently sustain, capped at the target.
    #[must_use]
    pub fn effective_tps(&self) -> f64 {
        let mspt = self.average_mspt();
        let budget_ms = self.budget.as_secs_f64() * 1000.0;
        if mspt <= budget_ms {
            f64::from(self.tick_rate)
        } else {
            1000.0 / mspt
        }
    }

    /// Number of ticks that exceeded their budget.
    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Time budget per tick.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Target ticks per second.
    #[must_use]
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget() {
        let timer = TickTimer::new(20);
        assert_eq!(timer.budget(), Duration::from_millis(50));
        assert_eq!(TickTimer::new(0).tick_rate(), 1);
    }

    #[test]
    fn test_wait_paces_ticks() {
        let mut timer = TickTimer::new(100);
        let start = Instant::now();
        for _ in 0..5 {
            timer.wait_next();
        }
        // First tick is due immediately, then one per 10ms.
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn test_falling_behind_resets_schedule() {
        let mut timer = TickTimer::new(100);
        timer.wait_next();
        std::thread::sleep(Duration::from_millis(50));
        let behind = timer.wait_next();
        assert!(behind >= Duration::from_millis(30));

        let start = Instant::now();
        timer.wait_next();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_record_and_averages() {
        let mut timer = TickTimer::new(20);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));
        assert!((timer.average_mspt() - 20.0).abs() < 0.001);
        assert!((timer.effective_tps() - 20.0).abs() < 0.001);
        assert_eq!(timer.overruns(), 0);

        for _ in 0..200 {
            timer.record(Duration::from_millis(100));
        }
        assert_eq!(timer.overruns(), 200);
        assert!((timer.effective_tps() - 10.0).abs() < 0.001);
    }
}
