//! A single world: chunk store, visibility, entities and world state, driven
//! one tick at a time.

use std::sync::Arc;
use strata_common::{BlockPos, ChunkCoord, EntityId, ObserverId, WorldError, WorldResult};
use tracing::{debug, error, info, warn};

use crate::border::WorldBorder;
use crate::chunk::ChunkData;
use crate::clock::{Weather, WeatherChange, WorldClock};
use crate::config::WorldConfig;
use crate::entity::EntityTable;
use crate::generation::Generator;
use crate::io_queue::{IoQueue, Priority, Ticket, TickThreadGuard};
use crate::lock::ChunkLock;
use crate::meta::WorldMeta;
use crate::observer::{ObserverRegistry, ObserverSink};
use crate::persistence::Persistence;
use crate::registry::{BlockId, BlockRegistry};
use crate::scheduler::{SaveTrigger, TickScheduler};
use crate::store::{ChunkStore, DrainReport, LoadReport, SaveAllReport, StoreStats};
use crate::visibility::VisibilityTracker;

/// Name of the lock that keeps the spawn area resident.
pub const SPAWN_LOCK: &str = "spawn";

/// What happened during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Tick number
    pub tick: u64,
    /// Chunks that entered some observer's view
    pub entered: usize,
    /// Chunks that left some observer's view
    pub left: usize,
    /// Chunks delivered to observers
    pub delivered: usize,
    /// Entity spawn notifications
    pub spawned: usize,
    /// Entity despawn notifications
    pub despawned: usize,
    /// Loads and generations applied to the store
    pub loads_applied: usize,
    /// Regenerated chunks re-sent to their viewers
    pub resent: usize,
    /// Chunks unloaded
    pub evicted: usize,
    /// Saves issued by the eviction pass
    pub eviction_saves: usize,
    /// Saves completed
    pub saves: usize,
    /// Isolated per-chunk failures
    pub failures: Vec<WorldError>,
    /// Weather transitions
    pub weather: Vec<WeatherChange>,
    /// Full save result, when one ran
    pub autosave: Option<SaveAllReport>,
}

/// One world and everything it owns.
pub struct World {
    config: WorldConfig,
    generator_name: String,
    persistence: Arc<dyn Persistence>,
    store: ChunkStore,
    tracker: VisibilityTracker,
    observers: Arc<ObserverRegistry>,
    entities: EntityTable,
    sink: Arc<dyn ObserverSink>,
    scheduler: TickScheduler,
    border: WorldBorder,
    clock: WorldClock,
    weather: Weather,
    rng: fastrand::Rng,
    spawn: ChunkCoord,
    spawn_lock: ChunkLock,
    closed: bool,
}

impl World {
    /// Opens a world with the generator named in its config, then loads the
    /// spawn area.
    pub fn open(
        config: WorldConfig,
        registry: &BlockRegistry,
        persistence: Arc<dyn Persistence>,
        sink: Arc<dyn ObserverSink>,
    ) -> WorldResult<Self> {
        let generator = config
            .build_generator(registry)
            .map_err(|e| WorldError::Config(e.to_string()))?;
        Self::with_generator(config, generator, persistence, sink)
    }

    /// Opens a world with an explicit generator, then loads the spawn area.
    pub fn with_generator(
        mut config: WorldConfig,
        generator: Arc<dyn Generator>,
        persistence: Arc<dyn Persistence>,
        sink: Arc<dyn ObserverSink>,
    ) -> WorldResult<Self> {
        config.validate();
        let generator_name = generator.name().to_string();
        info!(
            "Opening world '{}' ({} generator, seed {})",
            config.name, generator_name, config.generator.seed
        );

        let meta = match persistence.load_meta() {
            Ok(Some(bytes)) => Some(WorldMeta::from_bytes(&bytes)?),
            Ok(None) => None,
            Err(e) => return Err(WorldError::Metadata(e.to_string())),
        };
        if let Some(meta) = &meta {
            if meta.seed != config.generator.seed || meta.generator != generator_name {
                warn!(
                    "World '{}' was created with {} generator seed {}; new chunks use {} seed {}",
                    config.name, meta.generator, meta.seed, generator_name, config.generator.seed
                );
            }
        }

        let spawn_hint = generator.spawn_hint();
        let queue = IoQueue::new(config.io_queue_config(), Arc::clone(&persistence), generator)
            .map_err(|e| WorldError::Config(format!("failed to start I/O workers: {e}")))?;
        let mut store = ChunkStore::new(queue, config.idle_ticks);

        let (tick, spawn, clock, weather, border) = match meta {
            Some(meta) => (meta.tick, meta.spawn, meta.clock, meta.weather, meta.border),
            None => (
                0,
                spawn_hint.unwrap_or(ChunkCoord::ORIGIN),
                WorldClock::default(),
                Weather::default(),
                WorldBorder::default(),
            ),
        };
        store.begin_tick(tick);

        let mut world = Self {
            tracker: VisibilityTracker::new(config.view_shape, config.near_radius),
            scheduler: TickScheduler::new(config.autosave_ticks, config.eviction_ticks)
                .starting_at(tick),
            rng: fastrand::Rng::with_seed(u64::from(config.generator.seed) ^ tick),
            generator_name,
            persistence,
            store,
            observers: Arc::new(ObserverRegistry::new()),
            entities: EntityTable::new(),
            sink,
            border,
            clock,
            weather,
            spawn,
            spawn_lock: ChunkLock::new(SPAWN_LOCK),
            closed: false,
            config,
        };

        world.prepare_spawn_area()?;
        Ok(world)
    }

    /// Pins and loads the spawn area, blocking until it is resident.
    fn prepare_spawn_area(&mut self) -> WorldResult<LoadReport> {
        let area = self.spawn_lock.acquire_area(
            &mut self.store,
            self.spawn,
            self.config.lock_region_radius,
            Priority::High,
        );
        info!(
            "Preparing spawn area of world '{}': {} chunks",
            self.config.name,
            area.len()
        );
        let report = self.store.load_blocking(&area, Priority::High)?;
        for (coord, e) in &report.failed {
            error!("Spawn chunk {coord} failed to load: {e}");
        }
        // Results were applied while blocking; nobody is waiting for them yet.
        let _ = self.store.drain_completions();
        info!(
            "Spawn area of world '{}' ready ({} loaded, {} failed)",
            self.config.name,
            report.loaded,
            report.failed.len()
        );
        Ok(report)
    }

    /// Runs one tick.
    ///
    /// Isolated chunk failures are listed in the report. An `Err` means a
    /// defect was detected and the world must stop ticking.
    pub fn tick(&mut self) -> WorldResult<TickReport> {
        let _guard = TickThreadGuard::enter();
        if self.closed {
            return Err(WorldError::ConcurrencyViolation(format!(
                "tick on closed world '{}'",
                self.config.name
            )));
        }

        let plan = self.scheduler.advance();
        self.store.begin_tick(plan.tick);
        let mut report = TickReport {
            tick: plan.tick,
            ..TickReport::default()
        };

        // 1. Border
        self.border.tick();

        // 2. Visibility
        let observers = self.observers.snapshot();
        let visibility =
            self.tracker
                .update(&observers, &mut self.store, &self.entities, self.sink.as_ref())?;
        report.entered = visibility.entered();
        report.left = visibility.left();
        report.delivered = visibility.delivered;
        report.spawned = visibility.spawned;
        report.despawned = visibility.despawned;

        // 3. Store maintenance
        let drained = self.store.drain_completions();
        self.absorb(drained, &mut report);
        report.delivered += self.tracker.deliver_pending(&self.store, self.sink.as_ref());
        if plan.evict {
            let eviction = self.store.evict_idle_pass()?;
            report.evicted += eviction.unloaded;
            report.eviction_saves = eviction.saves_issued;
        }

        // 4. Clock and weather
        self.clock.tick();
        for change in self.weather.tick(&mut self.rng) {
            debug!("World '{}': {change:?}", self.config.name);
            report.weather.push(change);
        }

        // 5. Full save
        if let Some(trigger) = plan.save {
            if trigger == SaveTrigger::Interval {
                debug!("Autosave of world '{}' at tick {}", self.config.name, plan.tick);
            }
            let (saved, meta_error) = self.save_everything();
            report.failures.extend(meta_error);
            report.autosave = Some(saved);
        }

        Ok(report)
    }

    fn absorb(&mut self, drained: DrainReport, report: &mut TickReport) {
        report.loads_applied += drained.loaded.len() + drained.regenerated.len();
        report.saves += drained.saved;
        report.evicted += drained.unloaded;
        if !drained.regenerated.is_empty() {
            report.resent += self
                .tracker
                .resend(&drained.regenerated, &self.store, self.sink.as_ref());
        }
        report
            .failures
            .extend(drained.load_failures.into_iter().map(|(_, e)| e));
        report
            .failures
            .extend(drained.recovered.into_iter().map(|(_, e)| e));
        report
            .failures
            .extend(drained.save_failures.into_iter().map(|(_, e)| e));
    }

    /// Saves every dirty chunk and the metadata, blocking until done.
    fn save_everything(&mut self) -> (SaveAllReport, Option<WorldError>) {
        let report = self.store.save_all_blocking(Priority::High);
        if report.still_dirty > 0 {
            warn!(
                "World '{}': {} chunk(s) still dirty after full save",
                self.config.name, report.still_dirty
            );
        }
        let meta_error = self.save_meta().err();
        if let Some(e) = &meta_error {
            error!("Failed to save metadata of world '{}': {e}", self.config.name);
        }
        (report, meta_error)
    }

    fn save_meta(&self) -> WorldResult<()> {
        let bytes = self.meta().to_bytes()?;
        self.persistence
            .save_meta(&bytes)
            .map_err(|e| WorldError::Metadata(e.to_string()))
    }

    /// Saves everything now, outside the autosave cadence.
    pub fn save_all(&mut self) -> WorldResult<SaveAllReport> {
        let (report, meta_error) = self.save_everything();
        match meta_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Runs a full save at the end of the next tick.
    pub fn request_save(&mut self) {
        self.scheduler.request_save();
    }

    /// Turns interval autosaves on or off.
    pub fn set_autosave(&mut self, enabled: bool) {
        info!(
            "Autosave of world '{}' {}",
            self.config.name,
            if enabled { "enabled" } else { "disabled" }
        );
        self.scheduler.set_autosave(enabled);
    }

    /// Moves the spawn and the area kept resident around it.
    ///
    /// The new area loads in the background; the old one becomes evictable.
    pub fn set_spawn(&mut self, spawn: ChunkCoord) -> WorldResult<()> {
        if spawn == self.spawn {
            return Ok(());
        }
        let mut lock = ChunkLock::new(SPAWN_LOCK);
        lock.acquire_area(
            &mut self.store,
            spawn,
            self.config.lock_region_radius,
            Priority::High,
        );
        let mut old = std::mem::replace(&mut self.spawn_lock, lock);
        old.clear(&mut self.store)?;
        info!(
            "Spawn of world '{}' moved from {} to {spawn}",
            self.config.name, self.spawn
        );
        self.spawn = spawn;
        Ok(())
    }

    /// Saves everything and stops the I/O workers.
    ///
    /// Fails with [`WorldError::UnsavedChunks`] if any chunk could not be
    /// saved.
    pub fn shutdown(&mut self) -> WorldResult<SaveAllReport> {
        if self.closed {
            return Ok(SaveAllReport::default());
        }
        info!("Shutting down world '{}'", self.config.name);
        let (report, meta_error) = self.save_everything();
        if let Err(e) = self.spawn_lock.clear(&mut self.store) {
            error!("Failed to release spawn area of world '{}': {e}", self.config.name);
        }
        self.store.shutdown_queue();
        self.closed = true;

        if report.still_dirty > 0 {
            return Err(WorldError::UnsavedChunks {
                count: report.still_dirty,
            });
        }
        if let Some(e) = meta_error {
            return Err(e);
        }
        info!(
            "World '{}' saved ({} chunk(s) written)",
            self.config.name, report.saved
        );
        Ok(report)
    }

    /// Snapshot of the persisted world state.
    #[must_use]
    pub fn meta(&self) -> WorldMeta {
        WorldMeta {
            name: self.config.name.clone(),
            seed: self.config.generator.seed,
            generator: self.generator_name.clone(),
            spawn: self.spawn,
            tick: self.scheduler.tick(),
            clock: self.clock,
            weather: self.weather,
            border: self.border.clone(),
        }
    }

    /// Registers an observer with its own entity at a block position.
    pub fn join_observer(&mut self, pos: BlockPos, radius: Option<u32>) -> (ObserverId, EntityId) {
        let entity = self.entities.spawn("player", pos);
        let radius = radius.unwrap_or(self.config.view_radius);
        let id = self.observers.join(pos.to_chunk_coord(), radius, Some(entity));
        (id, entity)
    }

    /// Removes an observer and its entity.
    pub fn leave_observer(&mut self, id: ObserverId) -> bool {
        let Some(observer) = self.observers.get(id) else {
            return false;
        };
        if let Some(entity) = observer.entity {
            self.entities.despawn(entity);
        }
        self.observers.leave(id)
    }

    /// Moves an observer and its entity.
    pub fn move_observer(&mut self, id: ObserverId, pos: BlockPos) -> bool {
        if let Some(entity) = self.observers.get(id).and_then(|o| o.entity) {
            self.entities.move_to(entity, pos);
        }
        self.observers.update_block_position(id, pos)
    }

    /// Reads a block from a resident chunk.
    #[must_use]
    pub fn block(&self, pos: BlockPos) -> Option<BlockId> {
        let data = self.store.resident(pos.to_chunk_coord())?;
        data.block(pos.to_local()?)
    }

    /// Writes a block in a resident chunk.
    pub fn set_block(&mut self, pos: BlockPos, block: BlockId) -> WorldResult<bool> {
        let Some(local) = pos.to_local() else {
            return Ok(false);
        };
        self.store
            .with_chunk_mut(pos.to_chunk_coord(), |data| data.set_block(local, block))
    }

    /// Mutates a resident chunk.
    pub fn with_chunk_mut<R>(
        &mut self,
        coord: ChunkCoord,
        f: impl FnOnce(&mut ChunkData) -> R,
    ) -> WorldResult<R> {
        self.store.with_chunk_mut(coord, f)
    }

    /// Discards a chunk's saved data and generates it again.
    pub fn force_regenerate(&mut self, coord: ChunkCoord) -> WorldResult<Ticket> {
        self.store.force_regenerate(coord)
    }

    /// World name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// World configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Registry network threads use to add and move observers.
    #[must_use]
    pub fn observers(&self) -> Arc<ObserverRegistry> {
        Arc::clone(&self.observers)
    }

    /// Entity table.
    #[must_use]
    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    /// Mutable entity table.
    pub fn entities_mut(&mut self) -> &mut EntityTable {
        &mut self.entities
    }

    /// Chunk store.
    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Mutable chunk store, for locks owned by other subsystems.
    pub fn store_mut(&mut self) -> &mut ChunkStore {
        &mut self.store
    }

    /// Store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Last tick number.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.scheduler.tick()
    }

    /// Spawn chunk.
    #[must_use]
    pub const fn spawn(&self) -> ChunkCoord {
        self.spawn
    }

    /// World clock.
    #[must_use]
    pub const fn clock(&self) -> &WorldClock {
        &self.clock
    }

    /// Weather state.
    #[must_use]
    pub const fn weather(&self) -> &Weather {
        &self.weather
    }

    /// Mutable weather state.
    pub fn weather_mut(&mut self) -> &mut Weather {
        &mut self.weather
    }

    /// World border.
    #[must_use]
    pub const fn border(&self) -> &WorldBorder {
        &self.border
    }

    /// Mutable world border.
    pub fn border_mut(&mut self) -> &mut WorldBorder {
        &mut self.border
    }

    /// Returns true after [`World::shutdown`].
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "World '{}' dropped without shutdown; {} dirty chunk(s) not saved",
                self.config.name,
                self.store.dirty_count()
            );
        }
    }
}
