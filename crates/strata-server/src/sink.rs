//! Observer sink for headless operation.
//!
//! Stands in for the network layer: every notification is counted and traced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_common::{ChunkCoord, EntityId, ObserverId};
use strata_world::entity::TrackedSubject;
use strata_world::{ChunkData, ObserverSink};
use tracing::trace;

/// Notification totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCounts {
    /// Chunks sent
    pub chunks_sent: u64,
    /// Chunks withdrawn
    pub chunks_withdrawn: u64,
    /// Entities shown
    pub entities_shown: u64,
    /// Entities hidden
    pub entities_hidden: u64,
}

/// Counts and traces notifications instead of sending them.
#[derive(Debug, Default)]
pub struct LoggingSink {
    world: String,
    chunks_sent: AtomicU64,
    chunks_withdrawn: AtomicU64,
    entities_shown: AtomicU64,
    entities_hidden: AtomicU64,
}

impl LoggingSink {
    /// Creates a sink for the named world.
    #[must_use]
    pub fn new(world: impl Into<String>) -> Self {
        Self {
            world: world.into(),
            ..Self::default()
        }
    }

    /// Totals so far.
    #[must_use]
    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_withdrawn: self.chunks_withdrawn.load(Ordering::Relaxed),
            entities_shown: self.entities_shown.load(Ordering::Relaxed),
            entities_hidden: self.entities_hidden.load(Ordering::Relaxed),
        }
    }
}

impl ObserverSink for LoggingSink {
    fn chunk_entered(&self, observer: ObserverId, coord: ChunkCoord, data: &Arc<ChunkData>) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        trace!(
            "[{}] chunk {coord} -> {observer} ({} blocks high)",
            self.world,
            data.height()
        );
    }

    fn chunk_left(&self, observer: ObserverId, coord: ChunkCoord) {
        self.chunks_withdrawn.fetch_add(1, Ordering::Relaxed);
        trace!("[{}] chunk {coord} withdrawn from {observer}", self.world);
    }

    fn entity_spawn(&self, observer: ObserverId, subject: &TrackedSubject) {
        self.entities_shown.fetch_add(1, Ordering::Relaxed);
        trace!(
            "[{}] {} {} shown to {observer}",
            self.world,
            subject.kind,
            subject.id
        );
    }

    fn entity_despawn(&self, observer: ObserverId, entity: EntityId) {
        self.entities_hidden.fetch_add(1, Ordering::Relaxed);
        trace!("[{}] {entity} hidden from {observer}", self.world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::BlockPos;

    #[test]
    fn test_counts_notifications() {
        let sink = LoggingSink::new("test");
        let observer = ObserverId::from_raw(1);
        let data = Arc::new(ChunkData::new(16));
        sink.chunk_entered(observer, ChunkCoord::ORIGIN, &data);
        sink.chunk_entered(observer, ChunkCoord::new(1, 0), &data);
        sink.chunk_left(observer, ChunkCoord::ORIGIN);

        let subject = TrackedSubject {
            id: EntityId::from_raw(9),
            kind: "player".into(),
            position: BlockPos::new(0, 0, 0),
        };
        sink.entity_spawn(observer, &subject);
        sink.entity_despawn(observer, subject.id);

        assert_eq!(
            sink.counts(),
            SinkCounts {
                chunks_sent: 2,
                chunks_withdrawn: 1,
                entities_shown: 1,
                entities_hidden: 1,
            }
        );
    }
}
