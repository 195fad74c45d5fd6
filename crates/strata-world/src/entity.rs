//! Entity table.
//!
//! Entities are addressed by [`EntityId`]; which observers see an entity is
//! derived by the visibility tracker every tick and never stored here.

use ahash::AHashMap;
use strata_common::{BlockPos, ChunkCoord, EntityId, IdAllocator};

/// An entity whose visibility is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSubject {
    /// Entity id
    pub id: EntityId,
    /// Entity type name
    pub kind: String,
    /// Current block position
    pub position: BlockPos,
}

impl TrackedSubject {
    /// Chunk the entity is in.
    #[must_use]
    pub const fn chunk(&self) -> ChunkCoord {
        self.position.to_chunk_coord()
    }
}

/// Arena of the world's entities.
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: AHashMap<EntityId, TrackedSubject>,
    ids: IdAllocator,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity and returns its id.
    pub fn spawn(&mut self, kind: impl Into<String>, position: BlockPos) -> EntityId {
        let id = EntityId::from_raw(self.ids.next_raw());
        self.entities.insert(
            id,
            TrackedSubject {
                id,
                kind: kind.into(),
                position,
            },
        );
        id
    }

    /// Removes an entity.
    pub fn despawn(&mut self, id: EntityId) -> Option<TrackedSubject> {
        self.entities.remove(&id)
    }

    /// Moves an entity. Returns false if it does not exist.
    pub fn move_to(&mut self, id: EntityId, position: BlockPos) -> bool {
        match self.entities.get_mut(&id) {
            Some(subject) => {
                subject.position = position;
                true
            },
            None => false,
        }
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&TrackedSubject> {
        self.entities.get(&id)
    }

    /// Every entity, ordered by id.
    #[must_use]
    pub fn sorted(&self) -> Vec<&TrackedSubject> {
        let mut subjects: Vec<&TrackedSubject> = self.entities.values().collect();
        subjects.sort_unstable_by_key(|s| s.id);
        subjects
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_move_despawn() {
        let mut table = EntityTable::new();
        let id = table.spawn("pig", BlockPos::new(0, 64, 0));
        assert_eq!(table.get(id).map(TrackedSubject::chunk), Some(ChunkCoord::ORIGIN));

        assert!(table.move_to(id, BlockPos::new(40, 64, -1)));
        assert_eq!(table.get(id).map(TrackedSubject::chunk), Some(ChunkCoord::new(2, -1)));

        assert_eq!(table.despawn(id).map(|s| s.kind), Some("pig".to_string()));
        assert!(!table.move_to(id, BlockPos::new(0, 0, 0)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut table = EntityTable::new();
        let a = table.spawn("a", BlockPos::new(0, 0, 0));
        table.despawn(a);
        let b = table.spawn("b", BlockPos::new(0, 0, 0));
        assert_ne!(a, b);
        assert_eq!(table.sorted().len(), 1);
    }
}
