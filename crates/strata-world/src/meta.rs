//! World metadata record.

use serde::{Deserialize, Serialize};
use strata_common::{ChunkCoord, MagicBytes, SchemaVersion, WorldError, WorldResult};

use crate::border::WorldBorder;
use crate::clock::{Weather, WorldClock};

/// Persisted world state that lives outside chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    /// World name
    pub name: String,
    /// Generator seed
    pub seed: u32,
    /// Generator name
    pub generator: String,
    /// Spawn chunk
    pub spawn: ChunkCoord,
    /// Last tick that ran
    pub tick: u64,
    /// In-game time
    pub clock: WorldClock,
    /// Weather countdowns
    pub weather: Weather,
    /// World border
    pub border: WorldBorder,
}

#[derive(Serialize, Deserialize)]
struct MetaRecord {
    magic: [u8; 4],
    version: SchemaVersion,
    meta: WorldMeta,
}

impl WorldMeta {
    /// Encodes the record with its magic bytes and schema version.
    pub fn to_bytes(&self) -> WorldResult<Vec<u8>> {
        let record = MetaRecord {
            magic: MagicBytes::WORLD_META.0,
            version: SchemaVersion::WORLD_META,
            meta: self.clone(),
        };
        bincode::serialize(&record).map_err(|e| WorldError::Metadata(e.to_string()))
    }

    /// Decodes a record written by [`WorldMeta::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> WorldResult<Self> {
        let record: MetaRecord =
            bincode::deserialize(bytes).map_err(|e| WorldError::Metadata(e.to_string()))?;
        if record.magic != MagicBytes::WORLD_META.0 {
            return Err(WorldError::Metadata("invalid magic bytes".into()));
        }
        if !SchemaVersion::WORLD_META.can_read(&record.version) {
            return Err(WorldError::Metadata(format!(
                "unsupported version {} (expected {})",
                record.version,
                SchemaVersion::WORLD_META
            )));
        }
        Ok(record.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorldMeta {
        let mut border = WorldBorder::default();
        border.resize(500.0, 0);
        WorldMeta {
            name: "alpha".into(),
            seed: 99,
            generator: "noise".into(),
            spawn: ChunkCoord::new(-2, 7),
            tick: 1200,
            clock: WorldClock {
                full_time: 1200,
                day_time: 1200,
            },
            weather: Weather {
                raining: true,
                rain_time: 40,
                ..Default::default()
            },
            border,
        }
    }

    #[test]
    fn test_encode_decode() {
        let bytes = sample().to_bytes().expect("encode");
        assert_eq!(WorldMeta::from_bytes(&bytes).expect("decode"), sample());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            WorldMeta::from_bytes(b"nonsense"),
            Err(WorldError::Metadata(_))
        ));
    }

    #[test]
    fn test_rejects_other_magic() {
        let mut bytes = sample().to_bytes().expect("encode");
        bytes[0] = b'X';
        assert!(WorldMeta::from_bytes(&bytes).is_err());
    }
}
