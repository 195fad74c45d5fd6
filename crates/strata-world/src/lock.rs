//! Named keep-alive handles over sets of chunks.

use ahash::AHashSet;
use strata_common::{ChunkCoord, WorldResult};
use tracing::{debug, warn};

use crate::io_queue::Priority;
use crate::store::{ChunkLookup, ChunkStore};

/// A named set of pinned chunks.
///
/// Each coordinate is pinned at most once per lock. Pins are only removed by
/// [`release`](Self::release) or [`clear`](Self::clear); dropping a lock that
/// still holds chunks leaves them pinned and logs a warning.
#[derive(Debug)]
pub struct ChunkLock {
    name: String,
    held: AHashSet<ChunkCoord>,
}

impl ChunkLock {
    /// Creates an empty lock.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            held: AHashSet::new(),
        }
    }

    /// Lock name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pins a chunk, loading it if absent.
    pub fn acquire(
        &mut self,
        store: &mut ChunkStore,
        coord: ChunkCoord,
        priority: Priority,
    ) -> ChunkLookup {
        if self.held.insert(coord) {
            store.pin(coord, priority)
        } else {
            store.get_or_load(coord, priority)
        }
    }

    /// Pins every chunk in the square of `radius` around `center`.
    ///
    /// Returns the area's coordinates in row-major order.
    pub fn acquire_area(
        &mut self,
        store: &mut ChunkStore,
        center: ChunkCoord,
        radius: u32,
        priority: Priority,
    ) -> Vec<ChunkCoord> {
        let r = radius as i32;
        let mut area = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dx in -r..=r {
            for dz in -r..=r {
                let coord = center.offset(dx, dz);
                self.acquire(store, coord, priority);
                area.push(coord);
            }
        }
        debug!("Lock '{}' pinned {} chunks around {center}", self.name, area.len());
        area
    }

    /// Unpins a chunk. Returns false if this lock did not hold it.
    pub fn release(&mut self, store: &mut ChunkStore, coord: ChunkCoord) -> WorldResult<bool> {
        if !self.held.remove(&coord) {
            return Ok(false);
        }
        store.unpin(coord)?;
        Ok(true)
    }

    /// Unpins every chunk held by this lock.
    pub fn clear(&mut self, store: &mut ChunkStore) -> WorldResult<usize> {
        let mut coords: Vec<ChunkCoord> = self.held.drain().collect();
        coords.sort_unstable();
        for &coord in &coords {
            store.unpin(coord)?;
        }
        Ok(coords.len())
    }

    /// Returns true if the lock holds the chunk.
    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.held.contains(&coord)
    }

    /// Number of chunks held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if the lock holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for ChunkLock {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            warn!(
                "Lock '{}' dropped while holding {} chunk(s); they stay pinned",
                self.name,
                self.held.len()
            );
        }
    }
}
