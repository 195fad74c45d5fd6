//! Synthetic observers for load testing.
//!
//! Each wanderer walks in a straight line and occasionally turns, dragging its
//! view across chunk borders so the store keeps loading and evicting.

use strata_common::{BlockPos, ObserverId};
use strata_world::World;

/// Blocks moved per tick.
const SPEED: i32 = 1;

/// One in this many ticks a wanderer picks a new heading.
const TURN_CHANCE: u32 = 200;

#[derive(Debug, Clone, Copy)]
struct Wanderer {
    observer: ObserverId,
    position: BlockPos,
    heading: (i32, i32),
}

/// Synthetic observers in one world.
#[derive(Debug)]
pub struct WandererPool {
    wanderers: Vec<Wanderer>,
    rng: fastrand::Rng,
}

impl WandererPool {
    /// Joins `count` wanderers near the world's spawn.
    pub fn spawn(world: &mut World, count: usize, seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let origin = world.spawn().min_block();
        let wanderers = (0..count)
            .map(|_| {
                let position = BlockPos::new(
                    origin.x + rng.i32(-64..64),
                    64,
                    origin.z + rng.i32(-64..64),
                );
                let (observer, _) = world.join_observer(position, None);
                Wanderer {
                    observer,
                    position,
                    heading: random_heading(&mut rng),
                }
            })
            .collect();
        Self { wanderers, rng }
    }

    /// Moves every wanderer one step.
    pub fn step(&mut self, world: &mut World) {
        for wanderer in &mut self.wanderers {
            if self.rng.u32(0..TURN_CHANCE) == 0 {
                wanderer.heading = random_heading(&mut self.rng);
            }
            wanderer.position = BlockPos::new(
                wanderer.position.x.saturating_add(wanderer.heading.0 * SPEED),
                wanderer.position.y,
                wanderer.position.z.saturating_add(wanderer.heading.1 * SPEED),
            );
            world.move_observer(wanderer.observer, wanderer.position);
        }
    }

    /// Removes every wanderer from the world.
    pub fn leave(&mut self, world: &mut World) {
        for wanderer in self.wanderers.drain(..) {
            world.leave_observer(wanderer.observer);
        }
    }

    /// Number of wanderers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wanderers.len()
    }
}

fn random_heading(rng: &mut fastrand::Rng) -> (i32, i32) {
    loop {
        let heading = (rng.i32(-1..=1), rng.i32(-1..=1));
        if heading != (0, 0) {
            return heading;
        }
    }
}
