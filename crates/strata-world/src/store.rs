//! Resident chunk cache.
//!
//! The store owns the chunk table and is only touched from the tick thread.
//! Loads, generation and saves go through the [`IoQueue`]; their results are
//! applied by [`ChunkStore::drain_completions`].

use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_common::{ChunkCoord, WorldError, WorldResult};
use tracing::{debug, error, info, warn};

use crate::chunk::ChunkData;
use crate::io_queue::{
    is_tick_thread, Completion, IoQueue, IoStats, Job, LoadSource, Outcome, Priority, Ticket,
};

/// How long blocking helpers wait on the completion channel per poll.
const BLOCKING_POLL: Duration = Duration::from_millis(100);

/// Lifecycle state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Not resident and nothing in flight
    Unloaded,
    /// A load or generate request is in flight
    Loading,
    /// Resident
    Loaded,
    /// Resident with a save in flight
    Saving,
}

/// Result of [`ChunkStore::get_or_load`].
#[derive(Debug, Clone)]
pub enum ChunkLookup {
    /// The chunk is resident
    Ready(Arc<ChunkData>),
    /// The chunk will be resident once the ticket completes
    Pending(Ticket),
}

impl ChunkLookup {
    /// Returns the payload if resident.
    #[must_use]
    pub fn ready(&self) -> Option<&Arc<ChunkData>> {
        match self {
            Self::Ready(data) => Some(data),
            Self::Pending(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct ChunkEntry {
    data: Option<Arc<ChunkData>>,
    /// Bumped on every mutation
    version: u64,
    /// Version known to be durable
    saved_version: u64,
    pins: u32,
    viewers: u32,
    last_access: u64,
    load: Option<Ticket>,
    save: Option<Ticket>,
    unload_after_save: bool,
    regenerating: bool,
}

impl ChunkEntry {
    fn state(&self) -> ChunkState {
        if self.load.is_some() {
            ChunkState::Loading
        } else if self.data.is_none() {
            ChunkState::Unloaded
        } else if self.save.is_some() {
            ChunkState::Saving
        } else {
            ChunkState::Loaded
        }
    }

    fn is_dirty(&self) -> bool {
        self.version > self.saved_version
    }

    fn is_referenced(&self) -> bool {
        self.pins > 0 || self.viewers > 0
    }

    /// Nothing resident, nothing in flight, nobody holding it.
    fn is_vacant(&self) -> bool {
        self.data.is_none() && self.load.is_none() && self.save.is_none() && !self.is_referenced()
    }
}

/// Results applied by one or more drains.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Chunks that became resident
    pub loaded: Vec<ChunkCoord>,
    /// Resident chunks replaced by a forced regeneration
    pub regenerated: Vec<ChunkCoord>,
    /// Loads or generations that failed
    pub load_failures: Vec<(ChunkCoord, WorldError)>,
    /// Chunks whose stored data was corrupt and has been regenerated
    pub recovered: Vec<(ChunkCoord, WorldError)>,
    /// Saves that completed
    pub saved: usize,
    /// Saves that failed after retries
    pub save_failures: Vec<(ChunkCoord, WorldError)>,
    /// Chunks unloaded after their eviction save
    pub unloaded: usize,
}

impl DrainReport {
    /// Returns true if nothing was applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
            && self.regenerated.is_empty()
            && self.load_failures.is_empty()
            && self.recovered.is_empty()
            && self.saved == 0
            && self.save_failures.is_empty()
            && self.unloaded == 0
    }
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Clean chunks unloaded immediately
    pub unloaded: usize,
    /// Dirty chunks scheduled for save-then-unload
    pub saves_issued: usize,
}

/// Result of a blocking full save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveAllReport {
    /// Saves that completed
    pub saved: usize,
    /// Chunks still dirty afterwards
    pub still_dirty: usize,
}

/// Result of a blocking load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Chunks resident at the end
    pub loaded: usize,
    /// Chunks that failed to load
    pub failed: Vec<(ChunkCoord, WorldError)>,
}

/// Store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries in the chunk table
    pub entries: usize,
    /// Resident chunks
    pub resident: usize,
    /// Chunks with a load in flight
    pub loading: usize,
    /// Chunks with a save in flight
    pub saving: usize,
    /// Resident chunks with unsaved changes
    pub dirty: usize,
    /// Chunks pinned by a lock
    pub pinned: usize,
    /// Requests queued or executing
    pub queued: usize,
    /// Worker counters
    pub io: IoStats,
}

/// The resident chunk cache.
pub struct ChunkStore {
    chunks: AHashMap<ChunkCoord, ChunkEntry>,
    queue: IoQueue,
    idle_threshold: u64,
    tick: u64,
    applied: DrainReport,
}

impl ChunkStore {
    /// Creates an empty store over a running queue.
    #[must_use]
    pub fn new(queue: IoQueue, idle_threshold: u64) -> Self {
        Self {
            chunks: AHashMap::new(),
            queue,
            idle_threshold,
            tick: 0,
            applied: DrainReport::default(),
        }
    }

    /// Sets the tick used for access times.
    pub fn begin_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Current tick as seen by the store.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Idle threshold in ticks.
    #[must_use]
    pub const fn idle_threshold(&self) -> u64 {
        self.idle_threshold
    }

    /// Returns the lifecycle state of a chunk.
    #[must_use]
    pub fn state(&self, coord: ChunkCoord) -> ChunkState {
        self.chunks
            .get(&coord)
            .map_or(ChunkState::Unloaded, ChunkEntry::state)
    }

    /// Returns the resident payload without touching the access time.
    #[must_use]
    pub fn resident(&self, coord: ChunkCoord) -> Option<Arc<ChunkData>> {
        self.chunks.get(&coord).and_then(|e| e.data.clone())
    }

    /// Returns true if the chunk has unsaved changes.
    #[must_use]
    pub fn is_dirty(&self, coord: ChunkCoord) -> bool {
        self.chunks.get(&coord).is_some_and(ChunkEntry::is_dirty)
    }

    /// Pin count of a chunk.
    #[must_use]
    pub fn pin_count(&self, coord: ChunkCoord) -> u32 {
        self.chunks.get(&coord).map_or(0, |e| e.pins)
    }

    /// Number of observers viewing a chunk.
    #[must_use]
    pub fn viewer_count(&self, coord: ChunkCoord) -> u32 {
        self.chunks.get(&coord).map_or(0, |e| e.viewers)
    }

    /// Returns true while a chunk is pinned, viewed, or has a request in
    /// flight.
    #[must_use]
    pub fn is_in_use(&self, coord: ChunkCoord) -> bool {
        self.chunks
            .get(&coord)
            .is_some_and(|e| e.is_referenced() || e.load.is_some() || e.save.is_some())
    }

    /// Tick of the last access to a chunk.
    #[must_use]
    pub fn last_access(&self, coord: ChunkCoord) -> Option<u64> {
        self.chunks.get(&coord).map(|e| e.last_access)
    }

    /// Returns the resident payload, or starts loading it.
    ///
    /// Concurrent calls for a chunk that is already loading share its ticket.
    pub fn get_or_load(&mut self, coord: ChunkCoord, priority: Priority) -> ChunkLookup {
        let tick = self.tick;
        let entry = self.chunks.entry(coord).or_default();
        entry.last_access = tick;
        entry.unload_after_save = false;

        if let Some(ticket) = &entry.load {
            return ChunkLookup::Pending(ticket.clone());
        }
        if let Some(data) = &entry.data {
            return ChunkLookup::Ready(Arc::clone(data));
        }

        let ticket = self.queue.submit(coord, Job::Load, priority);
        if ticket.is_done() {
            // Rejected by a closed queue; nothing is in flight.
            debug!("Load of chunk {coord} rejected: queue closed");
        } else {
            entry.load = Some(ticket.clone());
        }
        ChunkLookup::Pending(ticket)
    }

    /// Adds an observer reference and starts loading if needed.
    pub fn add_viewer(&mut self, coord: ChunkCoord, priority: Priority) -> ChunkLookup {
        self.chunks.entry(coord).or_default().viewers += 1;
        self.get_or_load(coord, priority)
    }

    /// Drops an observer reference.
    ///
    /// The idle clock restarts at the current tick.
    pub fn remove_viewer(&mut self, coord: ChunkCoord) -> WorldResult<()> {
        let tick = self.tick;
        let entry = self
            .chunks
            .get_mut(&coord)
            .filter(|e| e.viewers > 0)
            .ok_or_else(|| {
                WorldError::ConcurrencyViolation(format!("viewer released twice for chunk {coord}"))
            })?;
        entry.viewers -= 1;
        entry.last_access = tick;
        if entry.is_vacant() {
            self.chunks.remove(&coord);
        }
        Ok(())
    }

    /// Adds a pin and starts loading if needed.
    pub fn pin(&mut self, coord: ChunkCoord, priority: Priority) -> ChunkLookup {
        self.chunks.entry(coord).or_default().pins += 1;
        self.get_or_load(coord, priority)
    }

    /// Drops a pin.
    pub fn unpin(&mut self, coord: ChunkCoord) -> WorldResult<()> {
        let tick = self.tick;
        let entry = self
            .chunks
            .get_mut(&coord)
            .filter(|e| e.pins > 0)
            .ok_or_else(|| {
                WorldError::ConcurrencyViolation(format!("chunk {coord} unpinned more than pinned"))
            })?;
        entry.pins -= 1;
        entry.last_access = tick;
        if entry.is_vacant() {
            self.chunks.remove(&coord);
        }
        Ok(())
    }

    /// Mutates a resident chunk, marking it dirty.
    pub fn with_chunk_mut<R>(
        &mut self,
        coord: ChunkCoord,
        f: impl FnOnce(&mut ChunkData) -> R,
    ) -> WorldResult<R> {
        let tick = self.tick;
        let entry = self
            .chunks
            .get_mut(&coord)
            .ok_or(WorldError::NotLoaded(coord))?;
        let data = entry.data.as_mut().ok_or(WorldError::NotLoaded(coord))?;

        // Copies the payload if a save still holds the previous snapshot.
        let result = f(Arc::make_mut(data));
        entry.version += 1;
        entry.last_access = tick;
        entry.unload_after_save = false;
        Ok(result)
    }

    /// Saves a chunk if it is dirty.
    ///
    /// Returns the in-flight save ticket, or `None` when there is nothing to
    /// save.
    pub fn save(&mut self, coord: ChunkCoord, priority: Priority) -> Option<Ticket> {
        let entry = self.chunks.get_mut(&coord)?;
        if let Some(ticket) = &entry.save {
            return Some(ticket.clone());
        }
        if !entry.is_dirty() {
            return None;
        }
        let data = Arc::clone(entry.data.as_ref()?);
        let ticket = self.queue.submit(
            coord,
            Job::Save {
                data,
                version: entry.version,
            },
            priority,
        );
        if let Some(Err(e)) = ticket.poll() {
            warn!("Save of chunk {coord} rejected: {e}");
            return None;
        }
        entry.save = Some(ticket.clone());
        Some(ticket)
    }

    /// Discards persisted data for a chunk and generates it again.
    pub fn force_regenerate(&mut self, coord: ChunkCoord) -> WorldResult<Ticket> {
        let tick = self.tick;
        let entry = self.chunks.entry(coord).or_default();
        if entry.load.is_some() {
            return Err(WorldError::RequestPending(coord));
        }

        let ticket = self.queue.submit(
            coord,
            Job::Generate {
                discard_saved: true,
            },
            Priority::Critical,
        );
        if let Some(Err(e)) = ticket.poll() {
            if entry.is_vacant() {
                self.chunks.remove(&coord);
            }
            return Err(e);
        }
        entry.last_access = tick;
        entry.regenerating = entry.data.is_some();
        entry.load = Some(ticket.clone());
        info!("Regenerating chunk {coord}");
        Ok(ticket)
    }

    /// Applies every finished request without blocking.
    ///
    /// Also returns results applied by blocking helpers since the last drain.
    pub fn drain_completions(&mut self) -> DrainReport {
        while let Some(completion) = self.queue.try_completion() {
            self.apply(completion);
        }
        std::mem::take(&mut self.applied)
    }

    fn apply(&mut self, completion: Completion) {
        let Completion {
            request_id,
            coord,
            outcome,
            ..
        } = completion;
        let tick = self.tick;

        let Some(entry) = self.chunks.get_mut(&coord) else {
            warn!("Completion for unknown chunk {coord} ignored");
            return;
        };

        match outcome {
            Outcome::Loaded { data, source } => {
                if entry.load.as_ref().map(Ticket::request_id) != Some(request_id) {
                    warn!("Stale load completion for chunk {coord} ignored");
                    return;
                }
                entry.load = None;
                entry.data = Some(Arc::new(data));
                entry.last_access = tick;
                match source {
                    LoadSource::Disk => entry.saved_version = entry.version,
                    // Generated content is not on disk yet.
                    LoadSource::Generated => entry.version += 1,
                    LoadSource::Regenerated(e) => {
                        entry.version += 1;
                        self.applied.recovered.push((coord, e));
                    },
                }
                if std::mem::take(&mut entry.regenerating) {
                    self.applied.regenerated.push(coord);
                } else {
                    self.applied.loaded.push(coord);
                }
            },
            Outcome::LoadFailed(e) => {
                if entry.load.as_ref().map(Ticket::request_id) != Some(request_id) {
                    return;
                }
                entry.load = None;
                entry.regenerating = false;
                error!("Failed to load chunk {coord}: {e}");
                if entry.is_vacant() {
                    self.chunks.remove(&coord);
                }
                self.applied.load_failures.push((coord, e));
            },
            Outcome::Saved { version } => {
                entry.save = None;
                entry.saved_version = entry.saved_version.max(version);
                self.applied.saved += 1;
                if std::mem::take(&mut entry.unload_after_save)
                    && !entry.is_dirty()
                    && !entry.is_referenced()
                    && entry.load.is_none()
                {
                    self.chunks.remove(&coord);
                    self.applied.unloaded += 1;
                    debug!("Unloaded chunk {coord} after save");
                }
            },
            Outcome::SaveFailed { error: e, .. } => {
                entry.save = None;
                entry.unload_after_save = false;
                error!("Failed to save chunk {coord}, keeping it resident: {e}");
                self.applied.save_failures.push((coord, e));
            },
        }
    }

    /// Unloads a clean, unreferenced chunk.
    fn unload(&mut self, coord: ChunkCoord) -> WorldResult<()> {
        let Some(entry) = self.chunks.get(&coord) else {
            return Err(WorldError::NotLoaded(coord));
        };
        if entry.is_referenced() {
            return Err(WorldError::ConcurrencyViolation(format!(
                "unload of chunk {coord} with {} pin(s) and {} viewer(s)",
                entry.pins, entry.viewers
            )));
        }
        if entry.is_dirty() || entry.load.is_some() || entry.save.is_some() {
            return Err(WorldError::ConcurrencyViolation(format!(
                "unload of chunk {coord} in state {:?} (dirty: {})",
                entry.state(),
                entry.is_dirty()
            )));
        }
        self.chunks.remove(&coord);
        Ok(())
    }

    /// Unloads a resident chunk nobody references.
    ///
    /// A dirty chunk is saved first when `save` is set and leaves once the
    /// save lands; otherwise its changes are dropped. Returns true if the
    /// chunk left the table immediately.
    pub fn unload_chunk(&mut self, coord: ChunkCoord, save: bool) -> WorldResult<bool> {
        let entry = self
            .chunks
            .get(&coord)
            .filter(|e| e.data.is_some() || e.load.is_some())
            .ok_or(WorldError::NotLoaded(coord))?;
        if entry.is_referenced() {
            return Err(WorldError::ConcurrencyViolation(format!(
                "unload of chunk {coord} with {} pin(s) and {} viewer(s)",
                entry.pins, entry.viewers
            )));
        }
        if entry.load.is_some() || (entry.save.is_some() && !save) {
            return Err(WorldError::RequestPending(coord));
        }

        if save && (entry.is_dirty() || entry.save.is_some()) {
            if self.save(coord, Priority::Normal).is_none() {
                return Err(WorldError::QueueClosed);
            }
            if let Some(entry) = self.chunks.get_mut(&coord) {
                entry.unload_after_save = true;
            }
            return Ok(false);
        }

        if entry.is_dirty() {
            warn!("Unloading chunk {coord} without saving its changes");
        }
        self.chunks.remove(&coord);
        debug!("Unloaded chunk {coord}");
        Ok(true)
    }

    /// Unloads idle, unreferenced chunks; dirty ones are saved first.
    pub fn evict_idle_pass(&mut self) -> WorldResult<EvictionReport> {
        let tick = self.tick;
        let mut clean = Vec::new();
        let mut dirty = Vec::new();

        for (coord, entry) in &self.chunks {
            if entry.is_referenced() || entry.unload_after_save {
                continue;
            }
            match entry.state() {
                ChunkState::Unloaded => clean.push(*coord),
                ChunkState::Loaded if tick.saturating_sub(entry.last_access) >= self.idle_threshold => {
                    if entry.is_dirty() {
                        dirty.push(*coord);
                    } else {
                        clean.push(*coord);
                    }
                },
                _ => {},
            }
        }
        clean.sort_unstable();
        dirty.sort_unstable();

        let mut report = EvictionReport::default();
        for coord in clean {
            self.unload(coord)?;
            report.unloaded += 1;
        }
        for coord in dirty {
            if self.save(coord, Priority::Low).is_some() {
                if let Some(entry) = self.chunks.get_mut(&coord) {
                    entry.unload_after_save = true;
                }
                report.saves_issued += 1;
            }
        }

        if report.unloaded > 0 || report.saves_issued > 0 {
            debug!(
                "Eviction pass: {} unloaded, {} saving before unload",
                report.unloaded, report.saves_issued
            );
        }
        Ok(report)
    }

    /// Saves every dirty chunk and blocks until all saves settle.
    ///
    /// Chunks whose save fails stay dirty and are counted in `still_dirty`.
    pub fn save_all_blocking(&mut self, priority: Priority) -> SaveAllReport {
        let mut failed = AHashSet::new();
        let mut saved = 0;

        loop {
            let mut candidates: Vec<ChunkCoord> = self
                .chunks
                .iter()
                .filter(|(coord, e)| e.is_dirty() && e.save.is_none() && !failed.contains(*coord))
                .map(|(coord, _)| *coord)
                .collect();
            candidates.sort_unstable();

            let mut issued = 0;
            for coord in candidates {
                if self.save(coord, priority).is_some() {
                    issued += 1;
                } else {
                    failed.insert(coord);
                }
            }
            if issued == 0 && !self.chunks.values().any(|e| e.save.is_some()) {
                break;
            }

            while self.chunks.values().any(|e| e.save.is_some()) {
                let Some(completion) = self.queue.recv_completion(BLOCKING_POLL) else {
                    continue;
                };
                match &completion.outcome {
                    Outcome::Saved { .. } => saved += 1,
                    Outcome::SaveFailed { .. } => {
                        failed.insert(completion.coord);
                    },
                    _ => {},
                }
                self.apply(completion);
            }
        }

        SaveAllReport {
            saved,
            still_dirty: self.dirty_count(),
        }
    }

    /// Loads chunks and blocks until each is resident or has failed.
    ///
    /// Not allowed on the tick thread. Callers pin the coordinates first if
    /// the chunks must stay resident.
    pub fn load_blocking(&mut self, coords: &[ChunkCoord], priority: Priority) -> WorldResult<LoadReport> {
        if is_tick_thread() {
            return Err(WorldError::ConcurrencyViolation(
                "blocking load requested from the tick thread".into(),
            ));
        }

        let total = coords.len();
        let mut waiting: AHashSet<ChunkCoord> = AHashSet::new();
        let mut report = LoadReport::default();
        for &coord in coords {
            match self.get_or_load(coord, priority) {
                ChunkLookup::Ready(_) => report.loaded += 1,
                ChunkLookup::Pending(ticket) => {
                    if let Some(Err(e)) = ticket.poll() {
                        report.failed.push((coord, e));
                    } else {
                        waiting.insert(coord);
                    }
                },
            }
        }

        let mut last_log = Instant::now();
        while !waiting.is_empty() {
            if let Some(completion) = self.queue.recv_completion(BLOCKING_POLL) {
                let coord = completion.coord;
                let failure = match &completion.outcome {
                    Outcome::LoadFailed(e) if waiting.contains(&coord) => Some(e.clone()),
                    _ => None,
                };
                self.apply(completion);
                if let Some(e) = failure {
                    waiting.remove(&coord);
                    report.failed.push((coord, e));
                }
            }

            let before = waiting.len();
            waiting.retain(|coord| self.state(*coord) == ChunkState::Loading);
            report.loaded += before - waiting.len();

            if last_log.elapsed() >= Duration::from_secs(1) {
                info!(
                    "Preparing area: {}/{total} chunks",
                    report.loaded + report.failed.len()
                );
                last_log = Instant::now();
            }
        }

        Ok(report)
    }

    /// Number of resident chunks with unsaved changes.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.chunks
            .values()
            .filter(|e| e.data.is_some() && e.is_dirty())
            .count()
    }

    /// Returns store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            entries: self.chunks.len(),
            queued: self.queue.pending(),
            io: self.queue.stats(),
            ..StoreStats::default()
        };
        for entry in self.chunks.values() {
            if entry.data.is_some() {
                stats.resident += 1;
                if entry.is_dirty() {
                    stats.dirty += 1;
                }
            }
            if entry.load.is_some() {
                stats.loading += 1;
            }
            if entry.save.is_some() {
                stats.saving += 1;
            }
            if entry.pins > 0 {
                stats.pinned += 1;
            }
        }
        stats
    }

    /// Coordinates of all resident chunks, row-major.
    #[must_use]
    pub fn resident_coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter(|(_, e)| e.data.is_some())
            .map(|(c, _)| *c)
            .collect();
        coords.sort_unstable();
        coords
    }

    /// Stops the I/O queue after its queued work finishes.
    pub fn shutdown_queue(&mut self) {
        self.queue.shutdown();
    }
}
