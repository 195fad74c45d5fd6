//! # Strata Common
//!
//! Common types shared by the Strata world server crates:
//! - Coordinate types (block, chunk, local)
//! - ID types (EntityId, ObserverId)
//! - Version information for on-disk formats
//! - The world error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::version::*;
}

pub use prelude::*;
