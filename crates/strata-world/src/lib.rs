//! # Strata World
//!
//! Chunk lifecycle and per-world simulation state:
//! - Chunk payloads, block registry and reference generators
//! - Persistence backends and the prioritized I/O queue
//! - The resident chunk store with pins, viewers and idle eviction
//! - Observer visibility tracking and entity notifications
//! - World border, clock, weather and tick sequencing

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod border;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod entity;
pub mod generation;
pub mod io_queue;
pub mod lock;
pub mod meta;
pub mod observer;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod visibility;
pub mod world;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::border::WorldBorder;
    pub use crate::chunk::{ChunkData, ChunkError};
    pub use crate::clock::{Weather, WeatherChange, WeatherState, WorldClock};
    pub use crate::config::{GeneratorKind, WorldConfig};
    pub use crate::entity::{EntityTable, TrackedSubject};
    pub use crate::generation::{FlatGenerator, Generator, GeneratorConfig, NoiseGenerator};
    pub use crate::io_queue::{IoQueue, IoQueueConfig, Priority, Ticket};
    pub use crate::lock::ChunkLock;
    pub use crate::meta::WorldMeta;
    pub use crate::observer::{
        ObserverRegistry, ObserverSink, RecordingSink, SinkEvent, MAX_VIEW_RADIUS,
    };
    pub use crate::persistence::{FilePersistence, MemoryPersistence, Persistence, PersistenceError};
    pub use crate::registry::{BlockId, BlockRegistry};
    pub use crate::store::{ChunkLookup, ChunkState, ChunkStore, SaveAllReport, StoreStats};
    pub use crate::visibility::{ViewShape, VisibilityTracker};
    pub use crate::world::{TickReport, World};
}

pub use prelude::*;
