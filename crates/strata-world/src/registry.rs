//! Immutable block registry.
//!
//! Built once at startup and shared by reference with every consumer that
//! needs to resolve block names (generators, gameplay hooks).

use ahash::AHashMap;
use thiserror::Error;

/// Numeric block id as stored in chunk payloads. Id 0 is always air.
pub type BlockId = u16;

/// Name of the block registered at id 0.
pub const AIR: &str = "air";

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The same name was registered twice
    #[error("Block '{0}' registered twice")]
    Duplicate(String),
    /// More blocks than fit in a [`BlockId`]
    #[error("Block registry is full")]
    Full,
    /// A required block is missing
    #[error("Unknown block '{0}'")]
    Unknown(String),
}

/// Name to id mapping for block types.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    names: Vec<String>,
    by_name: AHashMap<String, BlockId>,
}

impl BlockRegistry {
    /// Starts a registry containing only air.
    #[must_use]
    pub fn builder() -> BlockRegistryBuilder {
        BlockRegistryBuilder {
            registry: Self {
                names: vec![AIR.to_string()],
                by_name: AHashMap::from_iter([(AIR.to_string(), 0)]),
            },
        }
    }

    /// Registry with the blocks the reference generators use.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut builder = Self::builder();
        for name in ["bedrock", "stone", "dirt", "grass", "sand", "water", "snow"] {
            // Names are unique and far below the id limit.
            let _ = builder.register(name);
        }
        builder.build()
    }

    /// Looks up a block id by name.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    /// Looks up a block id, failing with [`RegistryError::Unknown`].
    pub fn require(&self, name: &str) -> Result<BlockId, RegistryError> {
        self.id(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    /// Returns the name registered for an id.
    #[must_use]
    pub fn name(&self, id: BlockId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Number of registered blocks, including air.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; air is registered at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Builder that produces a frozen [`BlockRegistry`].
#[derive(Debug)]
pub struct BlockRegistryBuilder {
    registry: BlockRegistry,
}

impl BlockRegistryBuilder {
    /// Registers a block name and returns its id.
    pub fn register(&mut self, name: &str) -> Result<BlockId, RegistryError> {
        if self.registry.by_name.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        let id = BlockId::try_from(self.registry.names.len()).map_err(|_| RegistryError::Full)?;
        self.registry.names.push(name.to_string());
        self.registry.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> BlockRegistry {
        self.registry
    }
}
