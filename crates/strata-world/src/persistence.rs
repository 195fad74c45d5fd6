//! Chunk persistence interface and reference backends.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use strata_common::ChunkCoord;
use thiserror::Error;
use tracing::debug;

use crate::chunk::ChunkData;

/// Chunks per region directory along each axis.
const REGION_SHIFT: i32 = 5;

/// File name of the world metadata record.
const META_FILE: &str = "level.bin";

/// Persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// Nothing has been saved for the coordinate
    #[error("not found")]
    NotFound,
    /// Stored bytes could not be decoded
    #[error("corrupt data: {0}")]
    Corrupt(String),
    /// The storage layer failed; may succeed on retry
    #[error("io error: {0}")]
    Io(String),
}

impl From<io::Error> for PersistenceError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e.to_string())
        }
    }
}

/// Durable storage for chunk payloads and world metadata.
///
/// Called concurrently from I/O worker threads, never for the same
/// coordinate at the same time.
pub trait Persistence: Send + Sync {
    /// Loads the chunk saved for `coord`.
    fn load(&self, coord: ChunkCoord) -> Result<ChunkData, PersistenceError>;

    /// Saves a chunk, replacing any previous data.
    fn save(&self, coord: ChunkCoord, data: &ChunkData) -> Result<(), PersistenceError>;

    /// Discards the saved chunk. Deleting a missing chunk is not an error.
    fn delete(&self, coord: ChunkCoord) -> Result<(), PersistenceError>;

    /// Loads the world metadata record, if one was saved.
    fn load_meta(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Saves the world metadata record.
    fn save_meta(&self, bytes: &[u8]) -> Result<(), PersistenceError>;
}

/// Decodes chunk bytes and checks they belong to `coord`.
fn decode(coord: ChunkCoord, bytes: &[u8]) -> Result<ChunkData, PersistenceError> {
    let (stored, data) =
        ChunkData::deserialize(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
    if stored != coord {
        return Err(PersistenceError::Corrupt(format!(
            "file for {coord} holds chunk {stored}"
        )));
    }
    Ok(data)
}

fn encode(coord: ChunkCoord, data: &ChunkData) -> Result<Vec<u8>, PersistenceError> {
    data.serialize(coord)
        .map_err(|e| PersistenceError::Io(e.to_string()))
}

/// One compressed file per chunk, grouped into region directories.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    /// Opens (and creates) a world directory.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("region"))?;
        debug!("Opened world storage at {}", root.display());
        Ok(Self { root })
    }

    /// Returns the world directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for a chunk.
    fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        self.root
            .join("region")
            .join(format!(
                "r.{}.{}",
                coord.x >> REGION_SHIFT,
                coord.z >> REGION_SHIFT
            ))
            .join(format!("c.{}.{}.stch", coord.x, coord.z))
    }

    /// Writes through a temporary file so a crash never leaves half a chunk.
    fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }
}

impl Persistence for FilePersistence {
    fn load(&self, coord: ChunkCoord) -> Result<ChunkData, PersistenceError> {
        let bytes = fs::read(self.chunk_path(coord))?;
        decode(coord, &bytes)
    }

    fn save(&self, coord: ChunkCoord, data: &ChunkData) -> Result<(), PersistenceError> {
        let bytes = encode(coord, data)?;
        Self::write_atomic(&self.chunk_path(coord), &bytes)?;
        Ok(())
    }

    fn delete(&self, coord: ChunkCoord) -> Result<(), PersistenceError> {
        match fs::remove_file(self.chunk_path(coord)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_meta(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(self.root.join(META_FILE)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_meta(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        Self::write_atomic(&self.root.join(META_FILE), bytes)?;
        Ok(())
    }
}

/// In-memory backend for tests and throwaway worlds.
///
/// Chunks are stored encoded so that loads go through the same codec as the
/// file backend.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    chunks: DashMap<u64, Vec<u8>>,
    meta: Mutex<Option<Vec<u8>>>,
}

impl MemoryPersistence {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes for a chunk, bypassing the encoder.
    pub fn insert_raw(&self, coord: ChunkCoord, bytes: Vec<u8>) {
        self.chunks.insert(coord.pack(), bytes);
    }

    /// Returns true if something is saved for `coord`.
    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord.pack())
    }

    /// Number of saved chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if nothing is saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, coord: ChunkCoord) -> Result<ChunkData, PersistenceError> {
        let bytes = self
            .chunks
            .get(&coord.pack())
            .ok_or(PersistenceError::NotFound)?;
        decode(coord, bytes.value())
    }

    fn save(&self, coord: ChunkCoord, data: &ChunkData) -> Result<(), PersistenceError> {
        let bytes = encode(coord, data)?;
        self.chunks.insert(coord.pack(), bytes);
        Ok(())
    }

    fn delete(&self, coord: ChunkCoord) -> Result<(), PersistenceError> {
        self.chunks.remove(&coord.pack());
        Ok(())
    }

    fn load_meta(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.meta.lock().clone())
    }

    fn save_meta(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        *self.meta.lock() = Some(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::LocalPos;
    use tempfile::TempDir;

    fn sample() -> ChunkData {
        let mut data = ChunkData::new(16);
        data.fill_column(2, 3, 0, 9, 4);
        data.set_block(LocalPos::new(15, 15, 15), 9);
        data
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FilePersistence::open(dir.path()).expect("open");
        let coord = ChunkCoord::new(-40, 77);

        storage.save(coord, &sample()).expect("save");
        assert_eq!(storage.load(coord).expect("load"), sample());
    }

    #[test]
    fn test_file_missing_is_not_found() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FilePersistence::open(dir.path()).expect("open");
        assert_eq!(
            storage.load(ChunkCoord::new(1, 1)),
            Err(PersistenceError::NotFound)
        );
        assert!(storage.delete(ChunkCoord::new(1, 1)).is_ok());
    }

    #[test]
    fn test_file_corrupt_is_reported() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FilePersistence::open(dir.path()).expect("open");
        let coord = ChunkCoord::new(0, 0);
        let path = storage.chunk_path(coord);
        FilePersistence::write_atomic(&path, b"definitely not a chunk").expect("write");

        assert!(matches!(
            storage.load(coord),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn test_file_delete() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FilePersistence::open(dir.path()).expect("open");
        let coord = ChunkCoord::new(5, -5);
        storage.save(coord, &sample()).expect("save");
        storage.delete(coord).expect("delete");
        assert_eq!(storage.load(coord), Err(PersistenceError::NotFound));
    }

    #[test]
    fn test_file_meta() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FilePersistence::open(dir.path()).expect("open");
        assert_eq!(storage.load_meta().expect("load meta"), None);
        storage.save_meta(b"meta").expect("save meta");
        assert_eq!(storage.load_meta().expect("load meta"), Some(b"meta".to_vec()));
    }

    #[test]
    fn test_memory_detects_misplaced_chunk() {
        let storage = MemoryPersistence::new();
        let bytes = sample().serialize(ChunkCoord::new(9, 9)).expect("serialize");
        storage.insert_raw(ChunkCoord::new(1, 2), bytes);

        assert!(matches!(
            storage.load(ChunkCoord::new(1, 2)),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn test_memory_round_trip() {
        let storage = MemoryPersistence::new();
        let coord = ChunkCoord::new(3, 4);
        assert!(storage.is_empty());
        storage.save(coord, &sample()).expect("save");
        assert!(storage.contains(coord));
        assert_eq!(storage.load(coord).expect("load"), sample());
    }
}
