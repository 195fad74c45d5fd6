//! Chunk payload and on-disk encoding.

use serde::{Deserialize, Serialize};
use strata_common::{ChunkCoord, LocalPos, MagicBytes, SchemaVersion, CHUNK_WIDTH};
use thiserror::Error;

use crate::registry::BlockId;

/// Number of block columns in a chunk.
pub const COLUMNS_PER_CHUNK: usize = (CHUNK_WIDTH * CHUNK_WIDTH) as usize;

/// Chunk errors.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    /// Deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    /// Invalid magic bytes
    #[error("Invalid chunk format")]
    InvalidFormat,
    /// Version mismatch
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version
        actual: String,
    },
    /// Compression failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
}

/// Result type for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Chunk header for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Chunk X coordinate
    pub x: i32,
    /// Chunk Z coordinate
    pub z: i32,
    /// Column height in blocks
    pub height: u32,
    /// Compression type (0 = none, 1 = lz4)
    pub compression: u8,
}

impl ChunkHeader {
    /// Creates a new header.
    #[must_use]
    pub fn new(coord: ChunkCoord, height: u32) -> Self {
        Self {
            magic: MagicBytes::CHUNK.0,
            version: SchemaVersion::CHUNK_FORMAT,
            x: coord.x,
            z: coord.z,
            height,
            compression: 1,
        }
    }

    /// Validates the header.
    pub fn validate(&self) -> ChunkResult<()> {
        if self.magic != MagicBytes::CHUNK.0 {
            return Err(ChunkError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_FORMAT.can_read(&self.version) {
            return Err(ChunkError::VersionMismatch {
                expected: SchemaVersion::CHUNK_FORMAT.to_string(),
                actual: self.version.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the coordinate recorded in the header.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.x, self.z)
    }
}

/// Block and biome data of one chunk column.
///
/// The store treats this as an opaque payload; only generators and gameplay
/// code look inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// Column height in blocks
    height: u32,
    /// Block ids, indexed by [`LocalPos::to_index`]
    blocks: Vec<BlockId>,
    /// Biome id per column
    biomes: Vec<u8>,
}

impl ChunkData {
    /// Creates an empty (all air) chunk of the given height.
    #[must_use]
    pub fn new(height: u32) -> Self {
        Self {
            height,
            blocks: vec![0; COLUMNS_PER_CHUNK * height as usize],
            biomes: vec![0; COLUMNS_PER_CHUNK],
        }
    }

    /// Returns the column height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Gets the block at a local position.
    #[must_use]
    pub fn block(&self, pos: LocalPos) -> Option<BlockId> {
        if pos.y >= self.height {
            return None;
        }
        self.blocks.get(pos.to_index()).copied()
    }

    /// Sets the block at a local position. Returns false when out of range.
    pub fn set_block(&mut self, pos: LocalPos, block: BlockId) -> bool {
        if pos.y >= self.height {
            return false;
        }
        match self.blocks.get_mut(pos.to_index()) {
            Some(slot) => {
                *slot = block;
                true
            },
            None => false,
        }
    }

    /// Fills `y_start..y_end` of one column with a block.
    pub fn fill_column(&mut self, x: u8, z: u8, y_start: u32, y_end: u32, block: BlockId) {
        let y_end = y_end.min(self.height);
        for y in y_start..y_end {
            let index = LocalPos::new(x, y, z).to_index();
            if let Some(slot) = self.blocks.get_mut(index) {
                *slot = block;
            }
        }
    }

    /// Returns the biome of a column.
    #[must_use]
    pub fn biome(&self, x: u8, z: u8) -> Option<u8> {
        self.biomes
            .get(LocalPos::new(x, 0, z).column_index())
            .copied()
    }

    /// Sets the biome of a column.
    pub fn set_biome(&mut self, x: u8, z: u8, biome: u8) -> bool {
        match self.biomes.get_mut(LocalPos::new(x, 0, z).column_index()) {
            Some(slot) => {
                *slot = biome;
                true
            },
            None => false,
        }
    }

    /// Returns the y of the highest non-air block in a column.
    #[must_use]
    pub fn highest_block_y(&self, x: u8, z: u8) -> Option<u32> {
        (0..self.height)
            .rev()
            .find(|&y| self.block(LocalPos::new(x, y, z)).is_some_and(|b| b != 0))
    }

    /// Returns a slice of all block ids.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Serializes the chunk for the given coordinate.
    pub fn serialize(&self, coord: ChunkCoord) -> ChunkResult<Vec<u8>> {
        let header = ChunkHeader::new(coord, self.height);

        let header_bytes = bincode::serialize(&header)
            .map_err(|e| ChunkError::SerializationFailed(e.to_string()))?;

        let block_bytes: &[u8] = bytemuck::cast_slice(&self.blocks);
        let mut body = Vec::with_capacity(block_bytes.len() + self.biomes.len());
        body.extend_from_slice(block_bytes);
        body.extend_from_slice(&self.biomes);

        let compressed = lz4_flex::compress_prepend_size(&body);

        let mut result = Vec::with_capacity(header_bytes.len() + compressed.len() + 4);
        result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        result.extend_from_slice(&header_bytes);
        result.extend_from_slice(&compressed);

        Ok(result)
    }

    /// Deserializes a chunk, returning the coordinate stored in its header.
    pub fn deserialize(bytes: &[u8]) -> ChunkResult<(ChunkCoord, Self)> {
        if bytes.len() < 8 {
            return Err(ChunkError::DeserializationFailed("data too short".into()));
        }

        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + header_len {
            return Err(ChunkError::DeserializationFailed(
                "header length mismatch".into(),
            ));
        }

        let header: ChunkHeader = bincode::deserialize(&bytes[4..4 + header_len])
            .map_err(|e| ChunkError::DeserializationFailed(e.to_string()))?;
        header.validate()?;

        let compressed = &bytes[4 + header_len..];
        let body = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| ChunkError::CompressionFailed(e.to_string()))?;

        let block_count = COLUMNS_PER_CHUNK * header.height as usize;
        let block_len = block_count * std::mem::size_of::<BlockId>();
        if body.len() != block_len + COLUMNS_PER_CHUNK {
            return Err(ChunkError::DeserializationFailed(
                "body size mismatch".into(),
            ));
        }

        let blocks: Vec<BlockId> = body[..block_len]
            .chunks_exact(std::mem::size_of::<BlockId>())
            .map(|pair| BlockId::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        let biomes = body[block_len..].to_vec();

        Ok((
            header.coord(),
            Self {
                height: header.height,
                blocks,
                biomes,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_creation() {
        let chunk = ChunkData::new(64);
        assert_eq!(chunk.height(), 64);
        assert_eq!(chunk.blocks().len(), COLUMNS_PER_CHUNK * 64);
        assert_eq!(chunk.block(LocalPos::new(0, 0, 0)), Some(0));
        assert_eq!(chunk.block(LocalPos::new(0, 64, 0)), None);
    }

    #[test]
    fn test_set_block_and_highest() {
        let mut chunk = ChunkData::new(32);
        assert!(chunk.set_block(LocalPos::new(3, 10, 4), 7));
        assert!(!chunk.set_block(LocalPos::new(3, 32, 4), 7));
        assert_eq!(chunk.block(LocalPos::new(3, 10, 4)), Some(7));
        assert_eq!(chunk.highest_block_y(3, 4), Some(10));
        assert_eq!(chunk.highest_block_y(0, 0), None);
    }

    #[test]
    fn test_fill_column_clamps_to_height() {
        let mut chunk = ChunkData::new(16);
        chunk.fill_column(1, 1, 0, 100, 2);
        assert_eq!(chunk.highest_block_y(1, 1), Some(15));
    }

    #[test]
    fn test_chunk_serialization() {
        let coord = ChunkCoord::new(-3, 9);
        let mut chunk = ChunkData::new(48);
        chunk.fill_column(5, 6, 0, 20, 3);
        chunk.set_biome(5, 6, 4);

        let bytes = chunk.serialize(coord).expect("serialize failed");
        let (loaded_coord, loaded) = ChunkData::deserialize(&bytes).expect("deserialize failed");

        assert_eq!(loaded_coord, coord);
        assert_eq!(loaded, chunk);
        assert_eq!(loaded.biome(5, 6), Some(4));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(ChunkData::deserialize(&[1, 2, 3]).is_err());

        let mut bytes = ChunkData::new(8)
            .serialize(ChunkCoord::ORIGIN)
            .expect("serialize failed");
        let last = bytes.len() - 1;
        bytes.truncate(last);
        assert!(ChunkData::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_header_validation() {
        let mut header = ChunkHeader::new(ChunkCoord::ORIGIN, 16);
        assert!(header.validate().is_ok());

        header.magic = *b"NOPE";
        assert!(matches!(header.validate(), Err(ChunkError::InvalidFormat)));

        header.magic = MagicBytes::CHUNK.0;
        header.version = SchemaVersion::new(9, 0, 0);
        assert!(matches!(
            header.validate(),
            Err(ChunkError::VersionMismatch { .. })
        ));
    }
}
