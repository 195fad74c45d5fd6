//! Per-observer chunk and entity visibility.
//!
//! Each update snapshots the observer registry, computes every observer's
//! visible chunk set, diffs it against the previous one and only then
//! commits the deltas to the store and the sink. Diffs are emitted in
//! row-major order (x, then z).
//!
//! A chunk that enters view while not yet resident is held as pending and
//! delivered once it loads. A pending chunk that leaves view before loading
//! produces no leave notification.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strata_common::{ChunkCoord, EntityId, ObserverId, WorldResult};
use tracing::debug;

use crate::entity::EntityTable;
use crate::io_queue::Priority;
use crate::observer::{ObserverSink, ObserverSnapshot, MAX_VIEW_RADIUS};
use crate::store::{ChunkLookup, ChunkStore};

/// Shape of an observer's view area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewShape {
    /// Chebyshev distance
    #[default]
    Square,
    /// Euclidean distance
    Circle,
}

impl ViewShape {
    /// Returns true if `coord` is within `radius` of `center`.
    #[must_use]
    pub const fn contains(self, center: ChunkCoord, coord: ChunkCoord, radius: u32) -> bool {
        match self {
            Self::Square => center.chebyshev_distance(coord) <= radius,
            Self::Circle => center.distance_squared(coord) <= (radius as u64) * (radius as u64),
        }
    }

    /// Every coordinate within `radius` of `center`, row-major.
    ///
    /// The radius is capped at [`MAX_VIEW_RADIUS`].
    #[must_use]
    pub fn area(self, center: ChunkCoord, radius: u32) -> Vec<ChunkCoord> {
        let radius = radius.min(MAX_VIEW_RADIUS);
        let side = 2 * radius as usize + 1;
        let mut coords = Vec::with_capacity(side.saturating_mul(side));
        let r = radius as i32;
        for dx in -r..=r {
            for dz in -r..=r {
                let coord = center.offset(dx, dz);
                if self.contains(center, coord, radius) {
                    coords.push(coord);
                }
            }
        }
        coords
    }
}

/// Chunks entering and leaving one observer's view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDelta {
    /// Observer the delta belongs to
    pub observer: Option<ObserverId>,
    /// Newly visible chunks, row-major
    pub entered: Vec<ChunkCoord>,
    /// No longer visible chunks, row-major
    pub left: Vec<ChunkCoord>,
}

impl ChunkDelta {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

/// Computes the row-major delta from `old` to `new`.
#[must_use]
pub fn diff(old: &AHashSet<ChunkCoord>, new: &AHashSet<ChunkCoord>) -> ChunkDelta {
    let mut entered: Vec<ChunkCoord> = new.difference(old).copied().collect();
    let mut left: Vec<ChunkCoord> = old.difference(new).copied().collect();
    entered.sort_unstable();
    left.sort_unstable();
    ChunkDelta {
        observer: None,
        entered,
        left,
    }
}

/// Counters from one [`VisibilityTracker::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityReport {
    /// Per-observer chunk deltas, in observer id order
    pub deltas: Vec<ChunkDelta>,
    /// Chunks delivered to observers
    pub delivered: usize,
    /// Leave notifications sent
    pub withdrawn: usize,
    /// Entity spawn notifications sent
    pub spawned: usize,
    /// Entity despawn notifications sent
    pub despawned: usize,
    /// Observers that disconnected since the last update
    pub disconnected: usize,
}

impl VisibilityReport {
    /// Total chunks entering view.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.deltas.iter().map(|d| d.entered.len()).sum()
    }

    /// Total chunks leaving view.
    #[must_use]
    pub fn left(&self) -> usize {
        self.deltas.iter().map(|d| d.left.len()).sum()
    }
}

#[derive(Debug, Default)]
struct ObserverView {
    center: ChunkCoord,
    radius: u32,
    visible: AHashSet<ChunkCoord>,
    delivered: AHashSet<ChunkCoord>,
    pending: BTreeSet<ChunkCoord>,
    entities: BTreeSet<EntityId>,
}

/// Tracks what each observer can see.
#[derive(Debug)]
pub struct VisibilityTracker {
    shape: ViewShape,
    near_radius: u32,
    views: BTreeMap<ObserverId, ObserverView>,
}

impl VisibilityTracker {
    /// Creates a tracker. Chunks within `near_radius` load at high priority.
    #[must_use]
    pub fn new(shape: ViewShape, near_radius: u32) -> Self {
        Self {
            shape,
            near_radius,
            views: BTreeMap::new(),
        }
    }

    /// View shape in use.
    #[must_use]
    pub const fn shape(&self) -> ViewShape {
        self.shape
    }

    /// Recomputes visibility for every observer and commits the deltas.
    pub fn update(
        &mut self,
        observers: &[ObserverSnapshot],
        store: &mut ChunkStore,
        entities: &EntityTable,
        sink: &dyn ObserverSink,
    ) -> WorldResult<VisibilityReport> {
        let mut report = VisibilityReport::default();

        // Disconnected observers release their chunks silently.
        let connected: AHashSet<ObserverId> = observers.iter().map(|o| o.id).collect();
        let gone: Vec<ObserverId> = self
            .views
            .keys()
            .filter(|id| !connected.contains(*id))
            .copied()
            .collect();
        for id in gone {
            if let Some(view) = self.views.remove(&id) {
                let mut coords: Vec<ChunkCoord> = view.visible.into_iter().collect();
                coords.sort_unstable();
                for coord in coords {
                    store.remove_viewer(coord)?;
                }
                report.disconnected += 1;
                debug!("Released view of disconnected {id}");
            }
        }

        // Compute every delta before touching anything.
        let mut planned = Vec::new();
        for observer in observers {
            let unchanged = self
                .views
                .get(&observer.id)
                .is_some_and(|v| v.center == observer.center && v.radius == observer.radius);
            if unchanged {
                continue;
            }
            let next: AHashSet<ChunkCoord> = self
                .shape
                .area(observer.center, observer.radius)
                .into_iter()
                .collect();
            let empty = AHashSet::new();
            let previous = self.views.get(&observer.id).map_or(&empty, |v| &v.visible);
            let mut delta = diff(previous, &next);
            delta.observer = Some(observer.id);
            planned.push((*observer, next, delta));
        }

        for (observer, next, delta) in planned {
            let view = self.views.entry(observer.id).or_default();

            for &coord in &delta.left {
                store.remove_viewer(coord)?;
                if view.delivered.remove(&coord) {
                    sink.chunk_left(observer.id, coord);
                    report.withdrawn += 1;
                } else {
                    view.pending.remove(&coord);
                }
            }

            for &coord in &delta.entered {
                let priority = if observer.center.chebyshev_distance(coord) <= self.near_radius {
                    Priority::High
                } else {
                    Priority::Normal
                };
                match store.add_viewer(coord, priority) {
                    ChunkLookup::Ready(data) => {
                        sink.chunk_entered(observer.id, coord, &data);
                        view.delivered.insert(coord);
                        report.delivered += 1;
                    },
                    ChunkLookup::Pending(_) => {
                        view.pending.insert(coord);
                    },
                }
            }

            view.center = observer.center;
            view.radius = observer.radius;
            view.visible = next;
            report.deltas.push(delta);
        }

        report.delivered += self.deliver_pending(store, sink);
        self.update_entities(observers, entities, sink, &mut report);
        Ok(report)
    }

    /// Sends pending chunks that have become resident.
    pub fn deliver_pending(&mut self, store: &ChunkStore, sink: &dyn ObserverSink) -> usize {
        let mut delivered = 0;
        for (&id, view) in &mut self.views {
            let ready: Vec<ChunkCoord> = view
                .pending
                .iter()
                .filter(|coord| store.resident(**coord).is_some())
                .copied()
                .collect();
            for coord in ready {
                if let Some(data) = store.resident(coord) {
                    view.pending.remove(&coord);
                    view.delivered.insert(coord);
                    sink.chunk_entered(id, coord, &data);
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Re-sends replaced chunks to observers that already have them.
    pub fn resend(&self, coords: &[ChunkCoord], store: &ChunkStore, sink: &dyn ObserverSink) -> usize {
        let mut sent = 0;
        for &coord in coords {
            let Some(data) = store.resident(coord) else {
                continue;
            };
            for (&id, view) in &self.views {
                if view.delivered.contains(&coord) {
                    sink.chunk_entered(id, coord, &data);
                    sent += 1;
                }
            }
        }
        sent
    }

    fn update_entities(
        &mut self,
        observers: &[ObserverSnapshot],
        entities: &EntityTable,
        sink: &dyn ObserverSink,
        report: &mut VisibilityReport,
    ) {
        let subjects = entities.sorted();
        for observer in observers {
            let Some(view) = self.views.get_mut(&observer.id) else {
                continue;
            };
            let now: BTreeSet<EntityId> = subjects
                .iter()
                .filter(|s| Some(s.id) != observer.entity)
                .filter(|s| self.shape.contains(observer.center, s.chunk(), observer.radius))
                .map(|s| s.id)
                .collect();

            for &id in view.entities.difference(&now) {
                sink.entity_despawn(observer.id, id);
                report.despawned += 1;
            }
            for &id in now.difference(&view.entities) {
                if let Some(subject) = entities.get(id) {
                    sink.entity_spawn(observer.id, subject);
                    report.spawned += 1;
                }
            }
            view.entities = now;
        }
    }

    /// Visible chunks of an observer, row-major.
    #[must_use]
    pub fn visible(&self, observer: ObserverId) -> Option<Vec<ChunkCoord>> {
        self.views.get(&observer).map(|view| {
            let mut coords: Vec<ChunkCoord> = view.visible.iter().copied().collect();
            coords.sort_unstable();
            coords
        })
    }

    /// Returns true if the chunk was delivered to the observer.
    #[must_use]
    pub fn is_delivered(&self, observer: ObserverId, coord: ChunkCoord) -> bool {
        self.views
            .get(&observer)
            .is_some_and(|v| v.delivered.contains(&coord))
    }

    /// Chunks waiting to load for any observer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.views.values().map(|v| v.pending.len()).sum()
    }

    /// Number of tracked observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.views.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_queue::tests::TestGenerator;
    use crate::io_queue::{IoQueue, IoQueueConfig};
    use crate::observer::{ObserverRegistry, RecordingSink, SinkEvent};
    use crate::persistence::MemoryPersistence;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use strata_common::BlockPos;

    fn store() -> ChunkStore {
        let queue = IoQueue::new(
            IoQueueConfig::default(),
            Arc::new(MemoryPersistence::new()),
            Arc::new(TestGenerator::new()),
        )
        .expect("start queue");
        ChunkStore::new(queue, 600)
    }

    fn settle(store: &mut ChunkStore) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            store.drain_completions();
            if store.stats().loading == 0 {
                return;
            }
            assert!(Instant::now() < deadline, "store did not settle");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn column(x: i32) -> Vec<ChunkCoord> {
        (-2..=2).map(|z| ChunkCoord::new(x, z)).collect()
    }

    #[test]
    fn test_shapes() {
        assert_eq!(ViewShape::Square.area(ChunkCoord::ORIGIN, 2).len(), 25);
        assert_eq!(ViewShape::Circle.area(ChunkCoord::ORIGIN, 2).len(), 13);
        assert!(!ViewShape::Circle.contains(ChunkCoord::ORIGIN, ChunkCoord::new(2, 2), 2));
        assert!(ViewShape::Square.contains(ChunkCoord::ORIGIN, ChunkCoord::new(2, 2), 2));
    }

    #[test]
    fn test_oversized_radius_is_capped() {
        let side = 2 * MAX_VIEW_RADIUS as usize + 1;
        assert_eq!(ViewShape::Square.area(ChunkCoord::ORIGIN, u32::MAX).len(), side * side);

        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 1);
        let snapshot = ObserverSnapshot {
            id: ObserverId::from_raw(1),
            center: ChunkCoord::ORIGIN,
            radius: 30_000,
            entity: None,
        };
        let report = tracker
            .update(&[snapshot], &mut store, &entities, &sink)
            .expect("update");
        assert_eq!(report.entered(), side * side);
        assert_eq!(tracker.visible(snapshot.id).map(|v| v.len()), Some(side * side));
    }

    #[test]
    fn test_move_one_chunk_east() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 1);

        let id = registry.join(ChunkCoord::ORIGIN, 2, None);
        let first = tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        assert_eq!(first.entered(), 25);

        registry.update_position(id, ChunkCoord::new(1, 0));
        let report = tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");

        assert_eq!(report.deltas.len(), 1);
        assert_eq!(report.deltas[0].entered, column(3));
        assert_eq!(report.deltas[0].left, column(-2));
        for coord in column(-2) {
            assert_eq!(store.viewer_count(coord), 0);
        }
    }

    #[test]
    fn test_unchanged_positions_yield_empty_deltas() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Circle, 1);
        registry.join(ChunkCoord::new(4, 4), 3, None);

        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        let second = tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");

        assert!(second.deltas.iter().all(ChunkDelta::is_empty));
        assert_eq!(second.entered(), 0);
        assert_eq!(second.left(), 0);
    }

    #[test]
    fn test_pending_chunks_delivered_after_load() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 0);
        let id = registry.join(ChunkCoord::ORIGIN, 1, None);

        let report = tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        assert_eq!(report.delivered, 0);
        assert_eq!(tracker.pending_count(), 9);

        settle(&mut store);
        assert_eq!(tracker.deliver_pending(&store, &sink), 9);
        assert!(tracker.is_delivered(id, ChunkCoord::new(1, 1)));
        let entered = sink
            .take()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::Entered(..)))
            .count();
        assert_eq!(entered, 9);
    }

    #[test]
    fn test_pending_chunk_leaving_sends_nothing() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 0);
        let id = registry.join(ChunkCoord::ORIGIN, 0, None);

        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        registry.update_position(id, ChunkCoord::new(10, 10));
        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");

        assert!(!sink
            .take()
            .iter()
            .any(|e| matches!(e, SinkEvent::Left(..))));
    }

    #[test]
    fn test_disconnect_releases_silently() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 0);
        let id = registry.join(ChunkCoord::ORIGIN, 1, None);

        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        settle(&mut store);
        tracker.deliver_pending(&store, &sink);
        sink.take();

        registry.leave(id);
        let report = tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");

        assert_eq!(report.disconnected, 1);
        assert!(sink.take().is_empty());
        assert_eq!(store.viewer_count(ChunkCoord::ORIGIN), 0);
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn test_entity_spawn_and_despawn() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let mut entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 0);

        let own = entities.spawn("player", BlockPos::new(0, 64, 0));
        let pig = entities.spawn("pig", BlockPos::new(20, 64, 0));
        let id = registry.join(ChunkCoord::ORIGIN, 1, Some(own));

        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        let spawns: Vec<SinkEvent> = sink
            .take()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::Spawn(..)))
            .collect();
        assert_eq!(spawns, vec![SinkEvent::Spawn(id, pig)]);

        entities.move_to(pig, BlockPos::new(100, 64, 0));
        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        assert_eq!(sink.take(), vec![SinkEvent::Despawn(id, pig)]);
    }

    #[test]
    fn test_regenerated_chunks_are_resent() {
        let registry = ObserverRegistry::new();
        let sink = RecordingSink::new();
        let mut store = store();
        let entities = EntityTable::new();
        let mut tracker = VisibilityTracker::new(ViewShape::Square, 0);
        let id = registry.join(ChunkCoord::ORIGIN, 0, None);

        tracker
            .update(&registry.snapshot(), &mut store, &entities, &sink)
            .expect("update");
        settle(&mut store);
        tracker.deliver_pending(&store, &sink);
        sink.take();

        assert_eq!(tracker.resend(&[ChunkCoord::ORIGIN, ChunkCoord::new(5, 5)], &store, &sink), 1);
        assert_eq!(sink.take(), vec![SinkEvent::Entered(id, ChunkCoord::ORIGIN)]);
    }

    proptest! {
        #[test]
        fn prop_diff_is_symmetric_difference(
            ax in -50i32..50, az in -50i32..50, ar in 0u32..6,
            bx in -50i32..50, bz in -50i32..50, br in 0u32..6,
            circle in any::<bool>(),
        ) {
            let shape = if circle { ViewShape::Circle } else { ViewShape::Square };
            let old: AHashSet<ChunkCoord> = shape.area(ChunkCoord::new(ax, az), ar).into_iter().collect();
            let new: AHashSet<ChunkCoord> = shape.area(ChunkCoord::new(bx, bz), br).into_iter().collect();
            let delta = diff(&old, &new);

            prop_assert!(delta.entered.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(delta.left.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(delta.entered.iter().all(|c| new.contains(c) && !old.contains(c)));
            prop_assert!(delta.left.iter().all(|c| old.contains(c) && !new.contains(c)));

            let mut applied = old.clone();
            for c in &delta.left {
                applied.remove(c);
            }
            applied.extend(delta.entered.iter().copied());
            prop_assert_eq!(applied, new);
        }
    }
}
