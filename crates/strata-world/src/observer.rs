//! Observer registry and the outbound notification sink.
//!
//! The network layer registers and moves observers from any thread; the tick
//! thread reads a sorted snapshot once per visibility update.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_common::{BlockPos, ChunkCoord, EntityId, ObserverId};

use crate::chunk::ChunkData;
use crate::entity::TrackedSubject;

/// Largest view radius an observer may request.
pub const MAX_VIEW_RADIUS: u32 = 32;

/// Observer state as seen by the tick thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverSnapshot {
    /// Observer id
    pub id: ObserverId,
    /// Chunk the observer is in
    pub center: ChunkCoord,
    /// View radius in chunks
    pub radius: u32,
    /// The observer's own entity, never sent back to it
    pub entity: Option<EntityId>,
}

/// Thread-safe table of connected observers.
///
/// Requested view radii are clamped to the registry's maximum.
#[derive(Debug)]
pub struct ObserverRegistry {
    observers: DashMap<ObserverId, ObserverSnapshot>,
    next_id: AtomicU64,
    max_radius: u32,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::with_max_radius(MAX_VIEW_RADIUS)
    }
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with a lower radius cap.
    #[must_use]
    pub fn with_max_radius(max_radius: u32) -> Self {
        Self {
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_radius: max_radius.min(MAX_VIEW_RADIUS),
        }
    }

    /// Largest radius an observer can have.
    #[must_use]
    pub const fn max_radius(&self) -> u32 {
        self.max_radius
    }

    /// Registers an observer and returns its id.
    pub fn join(&self, center: ChunkCoord, radius: u32, entity: Option<EntityId>) -> ObserverId {
        let radius = radius.min(self.max_radius);
        let id = ObserverId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.insert(
            id,
            ObserverSnapshot {
                id,
                center,
                radius,
                entity,
            },
        );
        id
    }

    /// Moves an observer. Returns false if it is not registered.
    pub fn update_position(&self, id: ObserverId, center: ChunkCoord) -> bool {
        self.observers
            .get_mut(&id)
            .map(|mut observer| observer.center = center)
            .is_some()
    }

    /// Moves an observer to the chunk containing a block position.
    pub fn update_block_position(&self, id: ObserverId, pos: BlockPos) -> bool {
        self.update_position(id, pos.to_chunk_coord())
    }

    /// Changes an observer's view radius.
    pub fn set_radius(&self, id: ObserverId, radius: u32) -> bool {
        let radius = radius.min(self.max_radius);
        self.observers
            .get_mut(&id)
            .map(|mut observer| observer.radius = radius)
            .is_some()
    }

    /// Removes an observer. Its chunk references are released on the next
    /// visibility update.
    pub fn leave(&self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    /// Returns one observer's state.
    #[must_use]
    pub fn get(&self, id: ObserverId) -> Option<ObserverSnapshot> {
        self.observers.get(&id).map(|o| *o)
    }

    /// Returns every observer, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObserverSnapshot> {
        let mut observers: Vec<ObserverSnapshot> = self.observers.iter().map(|o| *o).collect();
        observers.sort_unstable_by_key(|o| o.id);
        observers
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns true if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Receives visibility notifications for observers.
///
/// Called from the tick thread; implementations must not block.
pub trait ObserverSink: Send + Sync {
    /// A chunk became visible and resident.
    fn chunk_entered(&self, observer: ObserverId, coord: ChunkCoord, data: &Arc<ChunkData>);

    /// A previously delivered chunk left view.
    fn chunk_left(&self, observer: ObserverId, coord: ChunkCoord);

    /// An entity came into view.
    fn entity_spawn(&self, observer: ObserverId, subject: &TrackedSubject);

    /// An entity left view or was removed.
    fn entity_despawn(&self, observer: ObserverId, entity: EntityId);
}

/// A notification captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Chunk delivered
    Entered(ObserverId, ChunkCoord),
    /// Chunk withdrawn
    Left(ObserverId, ChunkCoord),
    /// Entity shown
    Spawn(ObserverId, EntityId),
    /// Entity hidden
    Despawn(ObserverId, EntityId),
}

/// Sink that records every notification, for tests and tools.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every event recorded so far.
    pub fn take(&self) -> Vec<SinkEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl ObserverSink for RecordingSink {
    fn chunk_entered(&self, observer: ObserverId, coord: ChunkCoord, _data: &Arc<ChunkData>) {
        self.events.lock().push(SinkEvent::Entered(observer, coord));
    }

    fn chunk_left(&self, observer: ObserverId, coord: ChunkCoord) {
        self.events.lock().push(SinkEvent::Left(observer, coord));
    }

    fn entity_spawn(&self, observer: ObserverId, subject: &TrackedSubject) {
        self.events.lock().push(SinkEvent::Spawn(observer, subject.id));
    }

    fn entity_despawn(&self, observer: ObserverId, entity: EntityId) {
        self.events.lock().push(SinkEvent::Despawn(observer, entity));
    }
}

impl<T: ObserverSink + ?Sized> ObserverSink for Arc<T> {
    fn chunk_entered(&self, observer: ObserverId, coord: ChunkCoord, data: &Arc<ChunkData>) {
        (**self).chunk_entered(observer, coord, data);
    }

    fn chunk_left(&self, observer: ObserverId, coord: ChunkCoord) {
        (**self).chunk_left(observer, coord);
    }

    fn entity_spawn(&self, observer: ObserverId, subject: &TrackedSubject) {
        (**self).entity_spawn(observer, subject);
    }

    fn entity_despawn(&self, observer: ObserverId, entity: EntityId) {
        (**self).entity_despawn(observer, entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_move_leave() {
        let registry = ObserverRegistry::new();
        let a = registry.join(ChunkCoord::ORIGIN, 4, None);
        let b = registry.join(ChunkCoord::new(5, 5), 2, None);
        assert_ne!(a, b);

        assert!(registry.update_block_position(a, BlockPos::new(-1, 70, 33)));
        assert_eq!(
            registry.get(a).map(|o| o.center),
            Some(ChunkCoord::new(-1, 2))
        );
        assert!(registry.set_radius(b, 8));

        assert!(registry.leave(a));
        assert!(!registry.leave(a));
        assert!(!registry.update_position(a, ChunkCoord::ORIGIN));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_sorted_by_id() {
        let registry = ObserverRegistry::new();
        let ids: Vec<ObserverId> = (0..16)
            .map(|i| registry.join(ChunkCoord::new(i, 0), 1, None))
            .collect();
        let snapshot: Vec<ObserverId> = registry.snapshot().iter().map(|o| o.id).collect();
        assert_eq!(snapshot, ids);
    }

    #[test]
    fn test_radius_is_clamped() {
        let registry = ObserverRegistry::new();
        let far = registry.join(ChunkCoord::ORIGIN, 30_000, None);
        assert_eq!(registry.get(far).map(|o| o.radius), Some(MAX_VIEW_RADIUS));

        assert!(registry.set_radius(far, u32::MAX));
        assert_eq!(registry.get(far).map(|o| o.radius), Some(MAX_VIEW_RADIUS));

        let small = ObserverRegistry::with_max_radius(6);
        let id = small.join(ChunkCoord::ORIGIN, 10, None);
        assert_eq!(small.get(id).map(|o| o.radius), Some(6));
        assert_eq!(ObserverRegistry::with_max_radius(500).max_radius(), MAX_VIEW_RADIUS);
    }
}
