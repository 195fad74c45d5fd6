//! Error types for Strata.

use thiserror::Error;

use crate::coords::ChunkCoord;

/// World and chunk lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Storage failed after the bounded number of retries
    #[error("I/O failed for chunk {coord} after {attempts} attempt(s): {message}")]
    Io {
        /// Chunk being read or written
        coord: ChunkCoord,
        /// Attempts made before giving up
        attempts: u32,
        /// Last error reported by storage
        message: String,
    },

    /// Persisted data could not be decoded
    #[error("Corrupt data for chunk {coord}: {message}")]
    CorruptData {
        /// Chunk whose data is corrupt
        coord: ChunkCoord,
        /// Decoder message
        message: String,
    },

    /// Terrain generation failed for one chunk
    #[error("Generation failed for chunk {coord}: {message}")]
    Generation {
        /// Chunk that failed to generate
        coord: ChunkCoord,
        /// Generator message
        message: String,
    },

    /// Programming defect detected at runtime
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    /// A load or generate request is already in flight for the chunk
    #[error("Request already pending for chunk {0}")]
    RequestPending(ChunkCoord),

    /// The chunk is not resident
    #[error("Chunk {0} is not loaded")]
    NotLoaded(ChunkCoord),

    /// The I/O queue has shut down
    #[error("I/O queue is closed")]
    QueueClosed,

    /// A full save finished with chunks still dirty
    #[error("{count} chunk(s) could not be saved")]
    UnsavedChunks {
        /// Number of chunks left dirty
        count: usize,
    },

    /// World metadata could not be read or written
    #[error("World metadata error: {0}")]
    Metadata(String),

    /// The world could not be set up from its configuration
    #[error("World configuration error: {0}")]
    Config(String),
}

impl WorldError {
    /// Returns true for errors that indicate a bug rather than a failed chunk.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConcurrencyViolation(_))
    }

    /// Returns the chunk this error is about, if any.
    #[must_use]
    pub const fn coord(&self) -> Option<ChunkCoord> {
        match self {
            Self::Io { coord, .. }
            | Self::CorruptData { coord, .. }
            | Self::Generation { coord, .. } => Some(*coord),
            Self::RequestPending(coord) | Self::NotLoaded(coord) => Some(*coord),
            _ => None,
        }
    }
}

/// Result type alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
