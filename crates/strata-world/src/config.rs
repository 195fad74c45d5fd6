//! Per-world configuration.
//!
//! Loaded from TOML; every field has a default so partial files work.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::generation::{FlatGenerator, Generator, GeneratorConfig, NoiseGenerator};
use crate::io_queue::IoQueueConfig;
use crate::observer::MAX_VIEW_RADIUS;
use crate::registry::{BlockRegistry, RegistryError};
use crate::scheduler::{DEFAULT_AUTOSAVE_TICKS, DEFAULT_EVICTION_TICKS};
use crate::visibility::ViewShape;

/// Which reference generator a world uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Perlin heightmap
    #[default]
    Noise,
    /// Fixed layers
    Flat,
}

/// World configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    // === Identity ===
    /// World name, also its directory name
    pub name: String,
    /// Keep chunks in memory only
    pub ephemeral: bool,

    // === Generation ===
    /// Generator to use
    pub generator_kind: GeneratorKind,

    // === Visibility ===
    /// Default observer view radius in chunks
    pub view_radius: u32,
    /// Chunks within this radius of an observer load first
    pub near_radius: u32,
    /// Square or circular view area
    pub view_shape: ViewShape,

    // === Lifecycle ===
    /// Ticks between autosaves (0 = disabled)
    pub autosave_ticks: u64,
    /// Ticks between eviction passes
    pub eviction_ticks: u64,
    /// Ticks a chunk must sit unused before eviction
    pub idle_ticks: u64,
    /// Radius of the always-loaded spawn area
    pub lock_region_radius: u32,

    // === I/O ===
    /// I/O worker threads
    pub worker_threads: usize,
    /// Attempts per storage operation
    pub io_retries: u32,
    /// Backoff between storage attempts in milliseconds
    pub io_backoff_ms: u64,

    // === Terrain ===
    /// Generator parameters (seed, height, terrain shape)
    pub generator: GeneratorConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            ephemeral: false,

            generator_kind: GeneratorKind::Noise,

            view_radius: 8,
            near_radius: 2,
            view_shape: ViewShape::Square,

            autosave_ticks: DEFAULT_AUTOSAVE_TICKS,
            eviction_ticks: DEFAULT_EVICTION_TICKS,
            idle_ticks: 600,
            lock_region_radius: 4,

            worker_threads: 4,
            io_retries: 3,
            io_backoff_ms: 50,

            generator: GeneratorConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("World config {} not found, using defaults", path.display());
            return Self::default();
        }

        let mut contents = String::new();
        if let Err(e) = fs::File::open(path).and_then(|mut f| f.read_to_string(&mut contents)) {
            warn!("Failed to read world config: {e}");
            return Self::default();
        }

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded world config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse world config: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved world config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        if self.name.trim().is_empty() {
            self.name = "world".to_string();
        }

        self.generator.height = self.generator.height.clamp(16, 1024);
        self.generator.sea_level = self.generator.sea_level.min(self.generator.height - 1);
        self.generator.terrain_scale = self.generator.terrain_scale.max(1.0);

        self.view_radius = self.view_radius.clamp(1, MAX_VIEW_RADIUS);
        self.near_radius = self.near_radius.min(self.view_radius);

        if self.autosave_ticks > 0 {
            self.autosave_ticks = self.autosave_ticks.max(20);
        }
        self.eviction_ticks = self.eviction_ticks.clamp(1, 1200);
        self.idle_ticks = self.idle_ticks.max(1);
        self.lock_region_radius = self.lock_region_radius.min(16);

        self.worker_threads = self.worker_threads.clamp(1, 64);
        self.io_retries = self.io_retries.clamp(1, 10);
        self.io_backoff_ms = self.io_backoff_ms.min(10_000);
    }

    /// I/O queue settings derived from this config.
    #[must_use]
    pub fn io_queue_config(&self) -> IoQueueConfig {
        IoQueueConfig {
            workers: self.worker_threads,
            retry_attempts: self.io_retries,
            retry_backoff: Duration::from_millis(self.io_backoff_ms),
        }
    }

    /// Builds the configured generator.
    pub fn build_generator(&self, registry: &BlockRegistry) -> Result<Arc<dyn Generator>, RegistryError> {
        Ok(match self.generator_kind {
            GeneratorKind::Noise => Arc::new(NoiseGenerator::new(self.generator.clone(), registry)?),
            GeneratorKind::Flat => Arc::new(FlatGenerator::classic(self.generator.height, registry)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("worlds").join("alpha.toml");
        let config = WorldConfig {
            name: "alpha".into(),
            view_shape: ViewShape::Circle,
            idle_ticks: 1234,
            ..Default::default()
        };
        config.save_to(&path).expect("save");

        let loaded = WorldConfig::load_from(&path);
        assert_eq!(loaded.name, "alpha");
        assert_eq!(loaded.view_shape, ViewShape::Circle);
        assert_eq!(loaded.idle_ticks, 1234);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("partial.toml");
        fs::write(&path, "view_radius = 3\ngenerator_kind = \"flat\"\n").expect("write");

        let loaded = WorldConfig::load_from(&path);
        assert_eq!(loaded.view_radius, 3);
        assert_eq!(loaded.generator_kind, GeneratorKind::Flat);
        assert_eq!(loaded.worker_threads, WorldConfig::default().worker_threads);
    }

    #[test]
    fn test_missing_or_invalid_file_gives_defaults() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        assert_eq!(WorldConfig::load_from(dir.path().join("nope.toml")).name, "world");

        let path = dir.path().join("bad.toml");
        fs::write(&path, "view_radius = \"far\"").expect("write");
        assert_eq!(WorldConfig::load_from(&path).view_radius, 8);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = WorldConfig {
            view_radius: 500,
            near_radius: 900,
            worker_threads: 0,
            autosave_ticks: 3,
            io_retries: 0,
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.view_radius, 32);
        assert_eq!(config.near_radius, 32);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.autosave_ticks, 20);
        assert_eq!(config.io_retries, 1);
    }

    #[test]
    fn test_build_generators() {
        let registry = BlockRegistry::with_defaults();
        let mut config = WorldConfig::default();
        assert_eq!(config.build_generator(&registry).expect("noise").name(), "noise");
        config.generator_kind = GeneratorKind::Flat;
        assert_eq!(config.build_generator(&registry).expect("flat").name(), "flat");
    }
}
