//! Coordinate types for block, chunk, and local positions.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Width and depth of a chunk column in blocks.
pub const CHUNK_WIDTH: u32 = 16;

/// Block position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct BlockPos {
    /// X coordinate in world space
    pub x: i32,
    /// Y coordinate (height)
    pub y: i32,
    /// Z coordinate in world space
    pub z: i32,
}

impl BlockPos {
    /// Creates a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the chunk column containing this block.
    #[must_use]
    pub const fn to_chunk_coord(self) -> ChunkCoord {
        ChunkCoord::from_block(self.x, self.z)
    }

    /// Converts to a position local to the containing chunk.
    ///
    /// Returns `None` when `y` is negative.
    #[must_use]
    pub const fn to_local(self) -> Option<LocalPos> {
        if self.y < 0 {
            return None;
        }
        let width = CHUNK_WIDTH as i32;
        Some(LocalPos {
            x: self.x.rem_euclid(width) as u8,
            z: self.z.rem_euclid(width) as u8,
            y: self.y as u32,
        })
    }
}

/// Chunk coordinate (identifies a chunk column in the world grid).
///
/// Ordering is row-major: by `x`, then by `z`. The default is the origin.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Pod,
    Zeroable,
)]
#[repr(C)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkCoord {
    /// The chunk at the world origin.
    pub const ORIGIN: Self = Self::new(0, 0);

    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the chunk containing the given block column.
    #[must_use]
    pub const fn from_block(block_x: i32, block_z: i32) -> Self {
        let width = CHUNK_WIDTH as i32;
        Self {
            x: block_x.div_euclid(width),
            z: block_z.div_euclid(width),
        }
    }

    /// Packs the coordinate into a single 64-bit key.
    ///
    /// `x` occupies the high 32 bits and `z` the low 32 bits.
    #[must_use]
    pub const fn pack(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }

    /// Unpacks a key produced by [`ChunkCoord::pack`].
    #[must_use]
    pub const fn unpack(key: u64) -> Self {
        Self {
            x: (key >> 32) as u32 as i32,
            z: key as u32 as i32,
        }
    }

    /// Returns the coordinate offset by the given amounts.
    #[must_use]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Chebyshev (square) distance in chunks.
    #[must_use]
    pub const fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        (if dx > dz { dx } else { dz }) as u32
    }

    /// Squared Euclidean distance in chunks.
    #[must_use]
    pub const fn distance_squared(self, other: Self) -> u64 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx * dx + dz * dz
    }

    /// Returns the block position of the chunk's minimum corner at `y = 0`.
    #[must_use]
    pub const fn min_block(self) -> BlockPos {
        let width = CHUNK_WIDTH as i32;
        BlockPos {
            x: self.x * width,
            y: 0,
            z: self.z * width,
        }
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// Block position inside a chunk column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    /// X within the chunk (0..16)
    pub x: u8,
    /// Z within the chunk (0..16)
    pub z: u8,
    /// Height
    pub y: u32,
}

impl LocalPos {
    /// Creates a new local position.
    #[must_use]
    pub const fn new(x: u8, y: u32, z: u8) -> Self {
        Self { x, z, y }
    }

    /// Converts to a linear index (y-major, then z, then x).
    #[must_use]
    pub const fn to_index(self) -> usize {
        let width = CHUNK_WIDTH as usize;
        (self.y as usize) * width * width + (self.z as usize) * width + (self.x as usize)
    }

    /// Index of this column in a per-column array (biomes, heightmap).
    #[must_use]
    pub const fn column_index(self) -> usize {
        (self.z as usize) * (CHUNK_WIDTH as usize) + (self.x as usize)
    }
}
