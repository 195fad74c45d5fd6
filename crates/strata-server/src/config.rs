//! Server configuration.
//!
//! Process-wide settings plus one [`WorldConfig`] table per hosted world.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use strata_world::WorldConfig;
use tracing::{info, warn};

/// Configuration file name.
const CONFIG_FILE: &str = "strata.toml";

/// Server configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // === Timing ===
    /// Ticks per second for every world
    pub tick_rate: u32,
    /// Seconds between status lines (0 = disabled)
    pub status_interval_secs: u64,

    // === Storage ===
    /// Directory holding one subdirectory per world
    pub data_dir: PathBuf,

    // === Load testing ===
    /// Synthetic observers wandering each world
    pub wanderers: usize,

    // === Worlds ===
    /// Hosted worlds
    pub worlds: Vec<WorldConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            status_interval_secs: 30,
            data_dir: default_data_dir(),
            wanderers: 0,
            worlds: vec![WorldConfig::default()],
        }
    }
}

impl ServerConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        let mut contents = String::new();
        if let Err(e) = fs::File::open(path).and_then(|mut f| f.read_to_string(&mut contents)) {
            warn!("Failed to read config file: {e}");
            return Self::default();
        }

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
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

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from(CONFIG_FILE),
            |dir| dir.join("strata").join(CONFIG_FILE),
        )
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.tick_rate = self.tick_rate.clamp(1, 200);
        self.wanderers = self.wanderers.min(1024);

        if self.worlds.is_empty() {
            warn!("No worlds configured, hosting the default world");
            self.worlds.push(WorldConfig::default());
        }
        for world in &mut self.worlds {
            world.validate();
        }

        // World names double as directory names.
        let mut seen = std::collections::HashSet::new();
        for world in &mut self.worlds {
            let base = world.name.clone();
            let mut suffix = 1;
            while !seen.insert(world.name.clone()) {
                suffix += 1;
                world.name = format!("{base}-{suffix}");
            }
            if world.name != base {
                warn!("Duplicate world name '{base}' renamed to '{}'", world.name);
            }
        }
    }

    /// Storage directory of a world.
    #[must_use]
    pub fn world_dir(&self, world: &WorldConfig) -> PathBuf {
        self.data_dir.join(&world.name)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("worlds"),
        |dir| dir.join("strata").join("worlds"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.worlds.len(), 1);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("strata.toml");

        let mut config = ServerConfig::default();
        config.tick_rate = 10;
        config.data_dir = temp_dir.path().join("data");
        config.worlds[0].name = "overworld".into();
        config.worlds.push(WorldConfig {
            name: "flatland".into(),
            ephemeral: true,
            ..Default::default()
        });
        config.save_to(&path).expect("Failed to save config");

        let loaded = ServerConfig::load_from(&path);
        assert_eq!(loaded.tick_rate, 10);
        assert_eq!(loaded.data_dir, temp_dir.path().join("data"));
        assert_eq!(loaded.worlds.len(), 2);
        assert_eq!(loaded.worlds[1].name, "flatland");
        assert!(loaded.worlds[1].ephemeral);
    }

    #[test]
    fn test_world_tables_parse() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("strata.toml");
        fs::write(
            &path,
            "tick_rate = 5\n\n[[worlds]]\nname = \"a\"\nview_radius = 4\n\n[worlds.generator]\nseed = 7\n",
        )
        .expect("write");

        let loaded = ServerConfig::load_from(&path);
        assert_eq!(loaded.tick_rate, 5);
        assert_eq!(loaded.worlds[0].view_radius, 4);
        assert_eq!(loaded.worlds[0].generator.seed, 7);
    }

    #[test]
    fn test_validate() {
        let mut config = ServerConfig {
            tick_rate: 0,
            worlds: Vec::new(),
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.tick_rate, 1);
        assert_eq!(config.worlds.len(), 1);
    }

    #[test]
    fn test_duplicate_world_names_renamed() {
        let mut config = ServerConfig {
            worlds: vec![WorldConfig::default(), WorldConfig::default()],
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.worlds[0].name, "world");
        assert_eq!(config.worlds[1].name, "world-2");
    }
}
