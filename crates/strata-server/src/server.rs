//! World group: one tick thread per hosted world.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use strata_common::{WorldError, WorldResult};
use strata_world::{
    BlockRegistry, FilePersistence, MemoryPersistence, ObserverRegistry, Persistence,
    SaveAllReport, World,
};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::sink::{LoggingSink, SinkCounts};
use crate::timing::TickTimer;
use crate::wanderer::WandererPool;

/// Live numbers of one world, refreshed by its tick thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldStatus {
    /// Last tick that ran
    pub tick: u64,
    /// Resident chunks
    pub resident: usize,
    /// Unsaved chunks
    pub dirty: usize,
    /// Requests waiting for or held by I/O workers
    pub queued: usize,
    /// Average milliseconds per tick
    pub mspt: f64,
    /// Notification totals
    pub sent: SinkCounts,
}

/// How a world thread ended.
#[derive(Debug)]
pub struct WorldExit {
    /// World name
    pub name: String,
    /// Last tick that ran
    pub ticks: u64,
    /// Defect that stopped the tick loop, if any
    pub fatal: Option<WorldError>,
    /// Result of the final save
    pub shutdown: WorldResult<SaveAllReport>,
}

impl WorldExit {
    /// Returns true if the world stopped on request and saved everything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.fatal.is_none() && self.shutdown.is_ok()
    }
}

struct WorldHandle {
    name: String,
    observers: Arc<ObserverRegistry>,
    status: Arc<Mutex<WorldStatus>>,
    thread: JoinHandle<WorldExit>,
}

/// Settings shared by every world thread.
#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    tick_rate: u32,
    status_interval: Duration,
}

/// Every hosted world and its tick thread.
pub struct WorldGroup {
    worlds: Vec<WorldHandle>,
    stop: Arc<AtomicBool>,
}

impl WorldGroup {
    /// Opens every configured world and starts its tick thread.
    ///
    /// Worlds open one after another; each blocks until its spawn area is
    /// resident.
    pub fn start(config: &ServerConfig, registry: &BlockRegistry) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let settings = LoopSettings {
            tick_rate: config.tick_rate,
            status_interval: Duration::from_secs(config.status_interval_secs),
        };
        let mut group = Self {
            worlds: Vec::with_capacity(config.worlds.len()),
            stop,
        };

        for (index, world_config) in config.worlds.iter().enumerate() {
            let persistence: Arc<dyn Persistence> = if world_config.ephemeral {
                Arc::new(MemoryPersistence::new())
            } else {
                let dir = config.world_dir(world_config);
                Arc::new(
                    FilePersistence::open(&dir)
                        .with_context(|| format!("Failed to open world directory {}", dir.display()))?,
                )
            };

            let name = world_config.name.clone();
            let sink = Arc::new(LoggingSink::new(name.clone()));
            let mut world = World::open(world_config.clone(), registry, persistence, sink.clone())
                .with_context(|| format!("Failed to open world '{name}'"))?;

            let wanderers = (config.wanderers > 0).then(|| {
                let seed = u64::from(world_config.generator.seed) ^ index as u64;
                WandererPool::spawn(&mut world, config.wanderers, seed)
            });

            let wanderers_len = wanderers.as_ref().map_or(0, WandererPool::len);
            let observers = world.observers();
            let status = Arc::new(Mutex::new(WorldStatus::default()));
            let thread = {
                let stop = Arc::clone(&group.stop);
                let status = Arc::clone(&status);
                thread::Builder::new()
                    .name(format!("strata-tick-{name}"))
                    .spawn(move || run_world(world, wanderers, &sink, settings, &stop, &status))
                    .context("Failed to spawn tick thread")?
            };

            info!(
                "World '{name}' running at {} ticks per second with {} wanderer(s)",
                config.tick_rate,
                wanderers_len
            );
            group.worlds.push(WorldHandle {
                name,
                observers,
                status,
                thread,
            });
        }

        Ok(group)
    }

    /// Observer registry of a world, for connection handlers.
    #[must_use]
    pub fn observers(&self, world: &str) -> Option<Arc<ObserverRegistry>> {
        self.worlds
            .iter()
            .find(|w| w.name == world)
            .map(|w| Arc::clone(&w.observers))
    }

    /// Latest status of a world.
    #[must_use]
    pub fn status(&self, world: &str) -> Option<WorldStatus> {
        self.worlds
            .iter()
            .find(|w| w.name == world)
            .map(|w| *w.status.lock())
    }

    /// Names of hosted worlds.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.worlds.iter().map(|w| w.name.as_str()).collect()
    }

    /// Returns true once every tick thread has exited.
    #[must_use]
    pub fn all_stopped(&self) -> bool {
        self.worlds.iter().all(|w| w.thread.is_finished())
    }

    /// Stops every tick loop, saves every world and joins the threads.
    pub fn stop(self) -> Vec<WorldExit> {
        self.stop.store(true, Ordering::SeqCst);
        self.worlds
            .into_iter()
            .map(|handle| {
                handle.thread.join().unwrap_or_else(|_| WorldExit {
                    name: handle.name.clone(),
                    ticks: handle.status.lock().tick,
                    fatal: Some(WorldError::ConcurrencyViolation("tick thread panicked".into())),
                    shutdown: Err(WorldError::QueueClosed),
                })
            })
            .collect()
    }
}

/// Turns world exits into a process result.
pub fn summarize(exits: &[WorldExit]) -> Result<()> {
    let mut failed = Vec::new();
    for exit in exits {
        match (&exit.fatal, &exit.shutdown) {
            (None, Ok(report)) => info!(
                "World '{}' stopped after tick {} ({} chunk(s) saved)",
                exit.name, exit.ticks, report.saved
            ),
            (fatal, shutdown) => {
                if let Some(e) = fatal {
                    error!("World '{}' halted at tick {}: {e}", exit.name, exit.ticks);
                }
                if let Err(e) = shutdown {
                    error!("World '{}' did not save cleanly: {e}", exit.name);
                }
                failed.push(exit.name.as_str());
            },
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("World(s) failed: {}", failed.join(", ")))
    }
}

fn run_world(
    mut world: World,
    mut wanderers: Option<WandererPool>,
    sink: &LoggingSink,
    settings: LoopSettings,
    stop: &AtomicBool,
    status: &Mutex<WorldStatus>,
) -> WorldExit {
    let mut timer = TickTimer::new(settings.tick_rate);
    let mut last_status = Instant::now();
    let mut fatal = None;

    while !stop.load(Ordering::SeqCst) {
        let behind = timer.wait_next();
        if behind > timer.budget() * 2 {
            debug!(
                "World '{}' running {}ms behind",
                world.name(),
                behind.as_millis()
            );
        }

        let started = Instant::now();
        if let Some(pool) = wanderers.as_mut() {
            pool.step(&mut world);
        }
        match world.tick() {
            Ok(report) => {
                for failure in &report.failures {
                    warn!("World '{}' tick {}: {failure}", world.name(), report.tick);
                }
            },
            Err(e) => {
                error!("World '{}' stopped ticking: {e}", world.name());
                fatal = Some(e);
                break;
            },
        }
        timer.record(started.elapsed());

        let stats = world.stats();
        *status.lock() = WorldStatus {
            tick: world.current_tick(),
            resident: stats.resident,
            dirty: stats.dirty,
            queued: stats.queued,
            mspt: timer.average_mspt(),
            sent: sink.counts(),
        };

        if !settings.status_interval.is_zero() && last_status.elapsed() >= settings.status_interval {
            last_status = Instant::now();
            info!(
                "World '{}': tick {}, {:.1}/{} TPS ({:.2} mspt, {} overruns), {} chunks resident, {} dirty, {} queued",
                world.name(),
                world.current_tick(),
                timer.effective_tps(),
                timer.tick_rate(),
                timer.average_mspt(),
                timer.overruns(),
                stats.resident,
                stats.dirty,
                stats.queued
            );
        }
    }

    if let Some(pool) = wanderers.as_mut() {
        pool.leave(&mut world);
    }
    let ticks = world.current_tick();
    let shutdown = world.shutdown();
    WorldExit {
        name: world.name().to_string(),
        ticks,
        fatal,
        shutdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::ChunkCoord;
    use strata_world::{GeneratorKind, WorldConfig};
    use tempfile::TempDir;

    fn server_config(dir: &TempDir) -> ServerConfig {
        let world = |name: &str, ephemeral: bool| WorldConfig {
            name: name.into(),
            ephemeral,
            generator_kind: GeneratorKind::Flat,
            lock_region_radius: 1,
            view_radius: 2,
            worker_threads: 2,
            ..Default::default()
        };
        ServerConfig {
            tick_rate: 100,
            status_interval_secs: 0,
            data_dir: dir.path().join("worlds"),
            wanderers: 2,
            worlds: vec![world("alpha", false), world("beta", true)],
        }
    }

    fn wait_for(group: &WorldGroup, world: &str, tick: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while group.status(world).map_or(0, |s| s.tick) < tick {
            assert!(Instant::now() < deadline, "world '{world}' did not reach tick {tick}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_group_runs_and_saves() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = server_config(&dir);
        let registry = BlockRegistry::with_defaults();

        let group = WorldGroup::start(&config, &registry).expect("start");
        assert_eq!(group.names(), vec!["alpha", "beta"]);
        assert_eq!(group.observers("alpha").map(|o| o.len()), Some(2));
        wait_for(&group, "alpha", 20);
        wait_for(&group, "beta", 20);
        assert!(group.status("alpha").is_some_and(|s| s.sent.chunks_sent > 0));
        assert!(!group.all_stopped());

        let exits = group.stop();
        assert!(exits.iter().all(WorldExit::is_clean));
        assert!(summarize(&exits).is_ok());

        // Only the persistent world left files behind.
        let alpha = FilePersistence::open(dir.path().join("worlds").join("alpha")).expect("open");
        assert!(alpha.load_meta().expect("meta").is_some());
        assert!(alpha.load(ChunkCoord::ORIGIN).is_ok());
        assert!(!dir.path().join("worlds").join("beta").exists());
    }

    #[test]
    fn test_external_observer_registration() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = server_config(&dir);
        config.wanderers = 0;
        let registry = BlockRegistry::with_defaults();

        let group = WorldGroup::start(&config, &registry).expect("start");
        let observers = group.observers("beta").expect("registry");
        observers.join(ChunkCoord::new(40, 40), 1, None);
        wait_for(&group, "beta", 5);

        let deadline = Instant::now() + Duration::from_secs(10);
        while group.status("beta").map_or(0, |s| s.sent.chunks_sent) < 9 {
            assert!(Instant::now() < deadline, "observer never received its view");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(group.observers("gamma").is_none());
        assert!(summarize(&group.stop()).is_ok());
    }

    #[test]
    fn test_summarize_reports_failures() {
        let exits = vec![WorldExit {
            name: "broken".into(),
            ticks: 3,
            fatal: None,
            shutdown: Err(WorldError::UnsavedChunks { count: 2 }),
        }];
        let err = summarize(&exits).expect_err("should fail");
        assert!(err.to_string().contains("broken"));
    }
}
