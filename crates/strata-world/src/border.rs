//! World border.

use serde::{Deserialize, Serialize};

/// Default border diameter in blocks.
pub const DEFAULT_BORDER_SIZE: f64 = 60_000_000.0;

/// Square border centered on a block column that can grow or shrink over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldBorder {
    /// Center X in blocks
    pub center_x: f64,
    /// Center Z in blocks
    pub center_z: f64,
    /// Current diameter in blocks
    pub size: f64,
    /// Diameter being moved towards
    pub target_size: f64,
    /// Ticks left until `target_size` is reached
    pub lerp_ticks: u64,
    /// Damage per block outside the safe zone
    pub damage_per_block: f64,
    /// Distance outside the border before damage applies
    pub safe_zone: f64,
    /// Warning distance in blocks
    pub warning_blocks: u32,
    /// Warning time in seconds
    pub warning_time: u32,
}

impl Default for WorldBorder {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_z: 0.0,
            size: DEFAULT_BORDER_SIZE,
            target_size: DEFAULT_BORDER_SIZE,
            lerp_ticks: 0,
            damage_per_block: 0.2,
            safe_zone: 5.0,
            warning_blocks: 5,
            warning_time: 15,
        }
    }
}

impl WorldBorder {
    /// Moves the border to `target` over `ticks` ticks; zero applies it now.
    pub fn resize(&mut self, target: f64, ticks: u64) {
        let target = target.max(1.0);
        self.target_size = target;
        self.lerp_ticks = ticks;
        if ticks == 0 {
            self.size = target;
        }
    }

    /// Advances one tick. Returns true while the border is moving.
    pub fn tick(&mut self) -> bool {
        if self.lerp_ticks == 0 {
            return false;
        }
        let step = (self.target_size - self.size) / self.lerp_ticks as f64;
        self.size += step;
        self.lerp_ticks -= 1;
        if self.lerp_ticks == 0 {
            self.size = self.target_size;
        }
        true
    }

    /// Returns true if the block column is inside the border.
    #[must_use]
    pub fn contains(&self, x: f64, z: f64) -> bool {
        let half = self.size / 2.0;
        (x - self.center_x).abs() <= half && (z - self.center_z).abs() <= half
    }

    /// Distance from a block column to the nearest border edge, negative
    /// outside.
    #[must_use]
    pub fn distance_inside(&self, x: f64, z: f64) -> f64 {
        let half = self.size / 2.0;
        let dx = half - (x - self.center_x).abs();
        let dz = half - (z - self.center_z).abs();
        dx.min(dz)
    }

    /// Damage per tick for an entity at the given column.
    #[must_use]
    pub fn damage_at(&self, x: f64, z: f64) -> f64 {
        let outside = -self.distance_inside(x, z) - self.safe_zone;
        if outside > 0.0 {
            outside * self.damage_per_block
        } else {
            0.0
        }
    }
}
