//! World clock and weather.
//!
//! Both advance once per tick. Weather durations are drawn from an RNG the
//! world seeds from its own seed, so the sequence of weather changes is
//! reproducible.

use serde::{Deserialize, Serialize};

/// Ticks in one in-game day.
pub const TICKS_PER_DAY: u64 = 24_000;

/// In-game time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldClock {
    /// Ticks since the world was created
    pub full_time: u64,
    /// Time of day, `0..TICKS_PER_DAY`
    pub day_time: u64,
}

impl WorldClock {
    /// Advances one tick.
    pub fn tick(&mut self) {
        self.full_time += 1;
        self.day_time = (self.day_time + 1) % TICKS_PER_DAY;
    }

    /// Sets the time of day, wrapping into range.
    pub fn set_day_time(&mut self, time: u64) {
        self.day_time = time % TICKS_PER_DAY;
    }

    /// Number of whole days elapsed.
    #[must_use]
    pub const fn day(&self) -> u64 {
        self.full_time / TICKS_PER_DAY
    }

    /// True between sunrise (0) and sunset (12000).
    #[must_use]
    pub const fn is_day(&self) -> bool {
        self.day_time < TICKS_PER_DAY / 2
    }
}

/// Current weather conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WeatherState {
    /// No precipitation
    #[default]
    Clear,
    /// Raining
    Raining,
    /// Raining with thunder
    Thundering,
}

/// A weather transition produced by [`Weather::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherChange {
    /// Rain began
    RainStarted,
    /// Rain stopped
    RainStopped,
    /// Thunder began
    ThunderStarted,
    /// Thunder stopped
    ThunderStopped,
}

const RAIN_DELAY: (u32, u32) = (12_000, 180_000);
const RAIN_DURATION: (u32, u32) = (12_000, 24_000);
const THUNDER_DELAY: (u32, u32) = (12_000, 180_000);
const THUNDER_DURATION: (u32, u32) = (3_600, 15_600);

/// Rain and thunder countdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Weather {
    /// Rain is falling
    pub raining: bool,
    /// Thunder is active
    pub thundering: bool,
    /// Ticks until rain toggles
    pub rain_time: u32,
    /// Ticks until thunder toggles
    pub thunder_time: u32,
    /// While positive, weather is forced clear
    pub clear_weather_time: u32,
}

impl Weather {
    /// Overall state.
    #[must_use]
    pub const fn state(&self) -> WeatherState {
        match (self.raining, self.thundering) {
            (true, true) => WeatherState::Thundering,
            (true, false) => WeatherState::Raining,
            _ => WeatherState::Clear,
        }
    }

    /// Forces clear weather for `ticks` ticks.
    pub fn force_clear(&mut self, ticks: u32) {
        self.clear_weather_time = ticks;
        self.rain_time = 0;
        self.thunder_time = 0;
    }

    /// Advances one tick, returning the transitions that happened.
    pub fn tick(&mut self, rng: &mut fastrand::Rng) -> Vec<WeatherChange> {
        let mut changes = Vec::new();

        if self.clear_weather_time > 0 {
            self.clear_weather_time -= 1;
            if self.thundering {
                self.thundering = false;
                changes.push(WeatherChange::ThunderStopped);
            }
            if self.raining {
                self.raining = false;
                changes.push(WeatherChange::RainStopped);
            }
            self.rain_time = u32::from(self.raining);
            self.thunder_time = u32::from(self.thundering);
            return changes;
        }

        if self.thunder_time == 0 {
            self.thunder_time = if self.thundering {
                draw(rng, THUNDER_DELAY)
            } else {
                draw(rng, THUNDER_DURATION)
            };
        } else {
            self.thunder_time -= 1;
            if self.thunder_time == 0 {
                self.thundering = !self.thundering;
                changes.push(if self.thundering {
                    WeatherChange::ThunderStarted
                } else {
                    WeatherChange::ThunderStopped
                });
            }
        }

        if self.rain_time == 0 {
            self.rain_time = if self.raining {
                draw(rng, RAIN_DURATION)
            } else {
                draw(rng, RAIN_DELAY)
            };
        } else {
            self.rain_time -= 1;
            if self.rain_time == 0 {
                self.raining = !self.raining;
                changes.push(if self.raining {
                    WeatherChange::RainStarted
                } else {
                    WeatherChange::RainStopped
                });
            }
        }

        changes
    }
}

fn draw(rng: &mut fastrand::Rng, (min, max): (u32, u32)) -> u32 {
    rng.u32(min..max)
}
