//! Terrain generation interface and reference generators.

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};
use strata_common::{ChunkCoord, CHUNK_WIDTH};
use thiserror::Error;

use crate::chunk::ChunkData;
use crate::registry::{BlockId, BlockRegistry, RegistryError};

/// Generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The generator cannot produce this chunk
    #[error("{0}")]
    Failed(String),
}

/// Produces chunk payloads for coordinates that have never been saved.
///
/// Implementations must be deterministic for a given seed and coordinate and
/// are called concurrently from I/O worker threads.
pub trait Generator: Send + Sync {
    /// Generates the chunk at `coord`.
    fn generate(&self, coord: ChunkCoord) -> Result<ChunkData, GenerationError>;

    /// Short name used in logs and world metadata.
    fn name(&self) -> &str;

    /// Preferred spawn chunk for a fresh world.
    ///
    /// `None` spawns at the origin.
    fn spawn_hint(&self) -> Option<ChunkCoord> {
        None
    }
}

/// Noise generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// World seed
    pub seed: u32,
    /// Column height in blocks
    pub height: u32,
    /// Water fills air below this level
    pub sea_level: u32,
    /// Terrain scale (larger = smoother)
    pub terrain_scale: f64,
    /// Amplitude of the height noise in blocks
    pub height_scale: f64,
    /// Surface height at noise value 0
    pub base_height: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            height: 128,
            sea_level: 62,
            terrain_scale: 100.0,
            height_scale: 24.0,
            base_height: 64.0,
        }
    }
}

/// Resolved block ids used by the reference generators.
#[derive(Debug, Clone, Copy)]
struct Palette {
    bedrock: BlockId,
    stone: BlockId,
    dirt: BlockId,
    grass: BlockId,
    sand: BlockId,
    water: BlockId,
    snow: BlockId,
}

impl Palette {
    fn resolve(registry: &BlockRegistry) -> Result<Self, RegistryError> {
        Ok(Self {
            bedrock: registry.require("bedrock")?,
            stone: registry.require("stone")?,
            dirt: registry.require("dirt")?,
            grass: registry.require("grass")?,
            sand: registry.require("sand")?,
            water: registry.require("water")?,
            snow: registry.require("snow")?,
        })
    }
}

/// Chunks searched in each direction for a dry spawn.
const SPAWN_SEARCH_RADIUS: i32 = 16;

/// Perlin heightmap generator.
pub struct NoiseGenerator {
    config: GeneratorConfig,
    palette: Palette,
    terrain_noise: Perlin,
    detail_noise: Perlin,
}

impl NoiseGenerator {
    /// Creates a new generator, resolving its blocks from the registry.
    pub fn new(config: GeneratorConfig, registry: &BlockRegistry) -> Result<Self, RegistryError> {
        let palette = Palette::resolve(registry)?;
        let terrain_noise = Perlin::new(config.seed);
        let detail_noise = Perlin::new(config.seed.wrapping_add(1));

        Ok(Self {
            config,
            palette,
            terrain_noise,
            detail_noise,
        })
    }

    /// Returns the generator configuration.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Surface height of a world column.
    fn surface_height(&self, world_x: f64, world_z: f64) -> u32 {
        let wx = world_x / self.config.terrain_scale;
        let wz = world_z / self.config.terrain_scale;
        let height = self.terrain_noise.get([wx, wz]);
        let detail = self.detail_noise.get([wx * 4.0, wz * 4.0]) * 0.1;
        let surface = self.config.base_height + (height + detail) * self.config.height_scale;
        surface.clamp(1.0, f64::from(self.config.height.saturating_sub(1))) as u32
    }

    /// Returns true if the center column of a chunk is above sea level.
    fn is_dry(&self, coord: ChunkCoord) -> bool {
        let origin = coord.min_block();
        let half = CHUNK_WIDTH as i32 / 2;
        let surface = self.surface_height(f64::from(origin.x + half), f64::from(origin.z + half));
        surface > self.config.sea_level
    }

    /// Picks the top block for a column from its height.
    fn surface_block(&self, surface: u32) -> BlockId {
        let sea = self.config.sea_level;
        match surface {
            s if s < sea.saturating_sub(1) => self.palette.dirt,
            s if s <= sea + 1 => self.palette.sand,
            s if s > self.config.height * 3 / 4 => self.palette.snow,
            _ => self.palette.grass,
        }
    }
}

impl Generator for NoiseGenerator {
    fn generate(&self, coord: ChunkCoord) -> Result<ChunkData, GenerationError> {
        let mut chunk = ChunkData::new(self.config.height);
        let origin = coord.min_block();

        for z in 0..CHUNK_WIDTH as u8 {
            for x in 0..CHUNK_WIDTH as u8 {
                let surface = self.surface_height(
                    f64::from(origin.x + i32::from(x)),
                    f64::from(origin.z + i32::from(z)),
                );

                chunk.fill_column(x, z, 0, 1, self.palette.bedrock);
                chunk.fill_column(x, z, 1, surface.saturating_sub(3), self.palette.stone);
                chunk.fill_column(x, z, surface.saturating_sub(3).max(1), surface, self.palette.dirt);
                chunk.fill_column(x, z, surface, surface + 1, self.surface_block(surface));
                if surface < self.config.sea_level {
                    chunk.fill_column(x, z, surface + 1, self.config.sea_level, self.palette.water);
                }
                chunk.set_biome(x, z, u8::from(surface < self.config.sea_level));
            }
        }

        Ok(chunk)
    }

    fn name(&self) -> &str {
        "noise"
    }

    /// Nearest dry chunk to the origin, searching ring by ring.
    fn spawn_hint(&self) -> Option<ChunkCoord> {
        (0..=SPAWN_SEARCH_RADIUS).find_map(|r| {
            (-r..=r)
                .flat_map(|dx| (-r..=r).map(move |dz| ChunkCoord::new(dx, dz)))
                .filter(|c| c.x.abs().max(c.z.abs()) == r)
                .find(|&c| self.is_dry(c))
        })
    }
}

/// Generator that stacks fixed layers in every chunk.
#[derive(Debug, Clone)]
pub struct FlatGenerator {
    height: u32,
    layers: Vec<(BlockId, u32)>,
}

impl FlatGenerator {
    /// Creates a flat generator from bottom-up `(block, thickness)` layers.
    #[must_use]
    pub fn new(height: u32, layers: Vec<(BlockId, u32)>) -> Self {
        Self { height, layers }
    }

    /// Bedrock, three stone, two dirt, one grass.
    pub fn classic(height: u32, registry: &BlockRegistry) -> Result<Self, RegistryError> {
        Ok(Self::new(
            height,
            vec![
                (registry.require("bedrock")?, 1),
                (registry.require("stone")?, 3),
                (registry.require("dirt")?, 2),
                (registry.require("grass")?, 1),
            ],
        ))
    }
}

impl Generator for FlatGenerator {
    fn generate(&self, _coord: ChunkCoord) -> Result<ChunkData, GenerationError> {
        let mut chunk = ChunkData::new(self.height);
        for z in 0..CHUNK_WIDTH as u8 {
            for x in 0..CHUNK_WIDTH as u8 {
                let mut y = 0;
                for &(block, thickness) in &self.layers {
                    chunk.fill_column(x, z, y, y + thickness, block);
                    y += thickness;
                }
            }
        }
        Ok(chunk)
    }

    fn name(&self) -> &str {
        "flat"
    }
}
