//! Asynchronous load/save/generate request queue.
//!
//! Requests are ordered by priority, then submission order, and executed by a
//! fixed pool of worker threads. Requests for the same coordinate never run
//! concurrently; their completions are posted in execution order.
//!
//! Workers never touch the chunk table. Each finished request fulfills its
//! [`Ticket`] and posts a [`Completion`] that the tick thread drains.

use ahash::AHashSet;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use strata_common::{ChunkCoord, WorldError, WorldResult};
use tracing::{debug, error, warn};

use crate::chunk::ChunkData;
use crate::generation::Generator;
use crate::persistence::{Persistence, PersistenceError};

thread_local! {
    static ON_TICK_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a world tick while alive.
///
/// Blocking on a [`Ticket`] is refused on a marked thread.
#[derive(Debug)]
pub struct TickThreadGuard {
    previous: bool,
}

impl TickThreadGuard {
    /// Marks the current thread.
    #[must_use]
    pub fn enter() -> Self {
        let previous = ON_TICK_THREAD.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for TickThreadGuard {
    fn drop(&mut self) {
        ON_TICK_THREAD.with(|flag| flag.set(self.previous));
    }
}

/// Returns true while the current thread is inside a world tick.
#[must_use]
pub fn is_tick_thread() -> bool {
    ON_TICK_THREAD.with(Cell::get)
}

/// Request priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Background work (idle eviction saves).
    Low = 0,
    /// Regular work (distant chunks).
    #[default]
    Normal = 1,
    /// Chunks near an observer, locks, autosave.
    High = 2,
    /// Shutdown saves and explicit regeneration.
    Critical = 3,
}

/// Request kind, as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Load from persistence, generating when nothing usable is stored.
    Load,
    /// Generate, ignoring persistence.
    Generate,
    /// Write a payload to persistence.
    Save,
}

impl RequestKind {
    /// True for the Load-or-Generate class.
    #[must_use]
    pub const fn is_load_class(self) -> bool {
        matches!(self, Self::Load | Self::Generate)
    }
}

/// Work carried by a request.
#[derive(Debug, Clone)]
pub enum Job {
    /// Load, falling back to generation.
    Load,
    /// Generate, optionally deleting the saved chunk first.
    Generate {
        /// Delete persisted data before generating
        discard_saved: bool,
    },
    /// Save a snapshot of the chunk.
    Save {
        /// Payload snapshot
        data: Arc<ChunkData>,
        /// Store version the snapshot was taken at
        version: u64,
    },
}

impl Job {
    /// Returns the request kind of this job.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Load => RequestKind::Load,
            Self::Generate { .. } => RequestKind::Generate,
            Self::Save { .. } => RequestKind::Save,
        }
    }
}

/// Where a loaded payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// Read from persistence.
    Disk,
    /// Nothing was stored; generated fresh.
    Generated,
    /// Stored data was corrupt; generated instead. Carries the
    /// [`WorldError::CorruptData`] describing what was lost.
    Regenerated(WorldError),
}

/// Result of a finished request.
#[derive(Debug)]
pub enum Outcome {
    /// A payload is ready to become resident.
    Loaded {
        /// The payload
        data: ChunkData,
        /// Where it came from
        source: LoadSource,
    },
    /// Loading and generating both failed.
    LoadFailed(WorldError),
    /// The snapshot at `version` is durable.
    Saved {
        /// Version that was written
        version: u64,
    },
    /// Saving failed after every retry.
    SaveFailed {
        /// Version that failed to write
        version: u64,
        /// Last error
        error: WorldError,
    },
}

/// Completion record drained by the tick thread.
#[derive(Debug)]
pub struct Completion {
    /// Id of the finished request
    pub request_id: u64,
    /// Chunk the request was for
    pub coord: ChunkCoord,
    /// Request kind
    pub kind: RequestKind,
    /// What happened
    pub outcome: Outcome,
}

#[derive(Debug)]
struct TicketInner {
    request_id: u64,
    coord: ChunkCoord,
    kind: RequestKind,
    result: Mutex<Option<WorldResult<()>>>,
    done: Condvar,
}

/// Completion handle of a request.
///
/// Clones share the same request. `poll` never blocks; `wait` blocks and is
/// meant for bootstrap and shutdown code only.
#[derive(Debug, Clone)]
pub struct Ticket {
    inner: Arc<TicketInner>,
}

impl Ticket {
    fn new(request_id: u64, coord: ChunkCoord, kind: RequestKind) -> Self {
        Self {
            inner: Arc::new(TicketInner {
                request_id,
                coord,
                kind,
                result: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    fn fulfill(&self, result: WorldResult<()>) {
        let mut slot = self.inner.result.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.inner.done.notify_all();
        }
    }

    /// Id of the request this ticket tracks.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    /// Chunk the request is for.
    #[must_use]
    pub fn coord(&self) -> ChunkCoord {
        self.inner.coord
    }

    /// Kind of the request.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.inner.kind
    }

    /// Returns the result if the request has finished.
    #[must_use]
    pub fn poll(&self) -> Option<WorldResult<()>> {
        self.inner.result.lock().clone()
    }

    /// Returns true once the request has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.result.lock().is_some()
    }

    /// Blocks until the request finishes.
    ///
    /// Fails with [`WorldError::ConcurrencyViolation`] on a tick thread.
    pub fn wait(&self) -> WorldResult<()> {
        if is_tick_thread() {
            return Err(WorldError::ConcurrencyViolation(format!(
                "blocking wait on {:?} request for {} from the tick thread",
                self.inner.kind, self.inner.coord
            )));
        }
        let mut slot = self.inner.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.inner.done.wait(&mut slot);
        }
    }

    /// Blocks up to `timeout`; `None` if still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WorldResult<()>> {
        if is_tick_thread() {
            return Some(Err(WorldError::ConcurrencyViolation(format!(
                "blocking wait on {:?} request for {} from the tick thread",
                self.inner.kind, self.inner.coord
            ))));
        }
        let mut slot = self.inner.result.lock();
        if slot.is_none() {
            let _ = self.inner.done.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }

    /// True if both tickets track the same request.
    #[must_use]
    pub fn same_request(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A queued request.
#[derive(Debug)]
struct Request {
    id: u64,
    coord: ChunkCoord,
    priority: Priority,
    job: Job,
    ticket: Ticket,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Request {}

impl Ord for Request {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then older request
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.id.cmp(&self.id),
            other => other,
        }
    }
}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Request>,
    busy: AHashSet<ChunkCoord>,
    shutdown: bool,
}

impl QueueState {
    /// Pops the best request whose coordinate is not already executing.
    fn take_runnable(&mut self) -> Option<Request> {
        let mut deferred = Vec::new();
        let mut found = None;
        while let Some(request) = self.heap.pop() {
            if self.busy.contains(&request.coord) {
                deferred.push(request);
            } else {
                found = Some(request);
                break;
            }
        }
        self.heap.extend(deferred);
        found
    }
}

/// I/O queue configuration.
#[derive(Debug, Clone)]
pub struct IoQueueConfig {
    /// Worker thread count
    pub workers: usize,
    /// Attempts per storage operation before giving up
    pub retry_attempts: u32,
    /// Sleep before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for IoQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Counters updated by worker threads.
#[derive(Debug, Default)]
struct IoCounters {
    disk_loads: AtomicU64,
    generated: AtomicU64,
    saves: AtomicU64,
    failed_loads: AtomicU64,
    failed_saves: AtomicU64,
    retries: AtomicU64,
}

/// Snapshot of the queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Payloads read from persistence
    pub disk_loads: u64,
    /// Payloads produced by the generator
    pub generated: u64,
    /// Successful saves
    pub saves: u64,
    /// Loads that failed for good
    pub failed_loads: u64,
    /// Saves that failed for good
    pub failed_saves: u64,
    /// Storage retries
    pub retries: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    persistence: Arc<dyn Persistence>,
    generator: Arc<dyn Generator>,
    completions: Sender<Completion>,
    counters: IoCounters,
    config: IoQueueConfig,
}

/// Priority queue of chunk requests drained by a worker pool.
pub struct IoQueue {
    shared: Arc<Shared>,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl IoQueue {
    /// Starts the worker pool.
    pub fn new(
        config: IoQueueConfig,
        persistence: Arc<dyn Persistence>,
        generator: Arc<dyn Generator>,
    ) -> io::Result<Self> {
        let (sender, receiver) = unbounded();
        let worker_count = config.workers.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            persistence,
            generator,
            completions: sender,
            counters: IoCounters::default(),
            config,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("strata-io-{index}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        debug!("Started I/O queue with {worker_count} workers");

        Ok(Self {
            shared,
            completions: receiver,
            workers,
            next_id: AtomicU64::new(1),
        })
    }

    /// Queues a request and returns its ticket.
    pub fn submit(&self, coord: ChunkCoord, job: Job, priority: Priority) -> Ticket {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let ticket = Ticket::new(id, coord, job.kind());

        let mut state = self.shared.state.lock();
        if state.shutdown {
            ticket.fulfill(Err(WorldError::QueueClosed));
            return ticket;
        }
        state.heap.push(Request {
            id,
            coord,
            priority,
            job,
            ticket: ticket.clone(),
        });
        drop(state);
        self.shared.work_ready.notify_one();
        ticket
    }

    /// Returns the next completion without blocking.
    #[must_use]
    pub fn try_completion(&self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Waits up to `timeout` for the next completion.
    #[must_use]
    pub fn recv_completion(&self, timeout: Duration) -> Option<Completion> {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Requests queued or executing.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.heap.len() + state.busy.len()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns a snapshot of the worker counters.
    #[must_use]
    pub fn stats(&self) -> IoStats {
        let c = &self.shared.counters;
        IoStats {
            disk_loads: c.disk_loads.load(AtomicOrdering::Relaxed),
            generated: c.generated.load(AtomicOrdering::Relaxed),
            saves: c.saves.load(AtomicOrdering::Relaxed),
            failed_loads: c.failed_loads.load(AtomicOrdering::Relaxed),
            failed_saves: c.failed_saves.load(AtomicOrdering::Relaxed),
            retries: c.retries.load(AtomicOrdering::Relaxed),
        }
    }

    /// Stops accepting requests, finishes queued work and joins the workers.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown && self.workers.is_empty() {
                return;
            }
            state.shutdown = true;
        }
        self.shared.work_ready.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("I/O worker panicked during shutdown");
            }
        }
        debug!("I/O queue stopped");
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let request = {
            let mut state = shared.state.lock();
            loop {
                if let Some(request) = state.take_runnable() {
                    state.busy.insert(request.coord);
                    break request;
                }
                if state.shutdown && state.heap.is_empty() {
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let coord = request.coord;
        let kind = request.job.kind();
        let outcome = execute(shared, coord, request.job);

        request.ticket.fulfill(match &outcome {
            Outcome::Loaded { .. } | Outcome::Saved { .. } => Ok(()),
            Outcome::LoadFailed(error) | Outcome::SaveFailed { error, .. } => Err(error.clone()),
        });

        // Post before releasing the coordinate so completions for one chunk
        // arrive in execution order.
        let _ = shared.completions.send(Completion {
            request_id: request.id,
            coord,
            kind,
            outcome,
        });

        shared.state.lock().busy.remove(&coord);
        shared.work_ready.notify_all();
    }
}

fn execute(shared: &Shared, coord: ChunkCoord, job: Job) -> Outcome {
    match job {
        Job::Load => match with_retries(shared, || shared.persistence.load(coord)) {
            Ok(data) => {
                shared.counters.disk_loads.fetch_add(1, AtomicOrdering::Relaxed);
                Outcome::Loaded {
                    data,
                    source: LoadSource::Disk,
                }
            },
            Err((PersistenceError::NotFound, _)) => generate(shared, coord, LoadSource::Generated),
            Err((PersistenceError::Corrupt(message), _)) => {
                warn!("Chunk {coord} has corrupt data ({message}); regenerating, stored data is lost");
                let lost = WorldError::CorruptData { coord, message };
                generate(shared, coord, LoadSource::Regenerated(lost))
            },
            Err((PersistenceError::Io(message), attempts)) => {
                shared.counters.failed_loads.fetch_add(1, AtomicOrdering::Relaxed);
                Outcome::LoadFailed(WorldError::Io {
                    coord,
                    attempts,
                    message,
                })
            },
        },
        Job::Generate { discard_saved } => {
            if discard_saved {
                if let Err((e, _)) = with_retries(shared, || shared.persistence.delete(coord)) {
                    warn!("Failed to discard saved chunk {coord}: {e}");
                }
            }
            generate(shared, coord, LoadSource::Generated)
        },
        Job::Save { data, version } => {
            match with_retries(shared, || shared.persistence.save(coord, &data)) {
                Ok(()) => {
                    shared.counters.saves.fetch_add(1, AtomicOrdering::Relaxed);
                    Outcome::Saved { version }
                },
                Err((e, attempts)) => {
                    shared.counters.failed_saves.fetch_add(1, AtomicOrdering::Relaxed);
                    Outcome::SaveFailed {
                        version,
                        error: WorldError::Io {
                            coord,
                            attempts,
                            message: e.to_string(),
                        },
                    }
                },
            }
        },
    }
}

fn generate(shared: &Shared, coord: ChunkCoord, source: LoadSource) -> Outcome {
    match shared.generator.generate(coord) {
        Ok(data) => {
            shared.counters.generated.fetch_add(1, AtomicOrdering::Relaxed);
            Outcome::Loaded { data, source }
        },
        Err(e) => {
            shared.counters.failed_loads.fetch_add(1, AtomicOrdering::Relaxed);
            Outcome::LoadFailed(WorldError::Generation {
                coord,
                message: e.to_string(),
            })
        },
    }
}

/// Runs a storage operation, retrying only on I/O errors.
fn with_retries<T>(
    shared: &Shared,
    mut op: impl FnMut() -> Result<T, PersistenceError>,
) -> Result<T, (PersistenceError, u32)> {
    let attempts = shared.config.retry_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(PersistenceError::Io(message)) if attempt < attempts => {
                shared.counters.retries.fetch_add(1, AtomicOrdering::Relaxed);
                debug!("Storage attempt {attempt}/{attempts} failed: {message}");
                thread::sleep(shared.config.retry_backoff * attempt);
                attempt += 1;
            },
            Err(e) => return Err((e, attempt)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::generation::GenerationError;
    use crate::persistence::MemoryPersistence;
    use std::sync::atomic::AtomicU32;

    /// Flat test generator that counts calls and can be told to fail.
    pub(crate) struct TestGenerator {
        pub calls: AtomicU32,
        pub fail_at: Option<ChunkCoord>,
        pub delay: Duration,
        pub spawn_at: Option<ChunkCoord>,
    }

    impl TestGenerator {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_at: None,
                delay: Duration::ZERO,
                spawn_at: None,
            }
        }
    }

    impl Generator for TestGenerator {
        fn generate(&self, coord: ChunkCoord) -> Result<ChunkData, GenerationError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.fail_at == Some(coord) {
                return Err(GenerationError::Failed("refusing".into()));
            }
            let mut data = ChunkData::new(4);
            data.fill_column(0, 0, 0, 1, 1);
            Ok(data)
        }

        fn name(&self) -> &str {
            "test"
        }

        fn spawn_hint(&self) -> Option<ChunkCoord> {
            self.spawn_at
        }
    }

    /// Persistence wrapper that fails the first `save_failures` saves and the
    /// first `load_failures` loads with I/O errors.
    pub(crate) struct FlakyPersistence {
        pub inner: MemoryPersistence,
        pub save_failures: AtomicU32,
        pub load_failures: AtomicU32,
        pub loads: AtomicU32,
    }

    impl FlakyPersistence {
        pub(crate) fn new(save_failures: u32) -> Self {
            Self {
                inner: MemoryPersistence::new(),
                save_failures: AtomicU32::new(save_failures),
                load_failures: AtomicU32::new(0),
                loads: AtomicU32::new(0),
            }
        }

        pub(crate) fn failing_loads(load_failures: u32) -> Self {
            let persistence = Self::new(0);
            persistence.load_failures.store(load_failures, AtomicOrdering::SeqCst);
            persistence
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl Persistence for FlakyPersistence {
        fn load(&self, coord: ChunkCoord) -> Result<ChunkData, PersistenceError> {
            self.loads.fetch_add(1, AtomicOrdering::SeqCst);
            if take_failure(&self.load_failures) {
                return Err(PersistenceError::Io("read error".into()));
            }
            self.inner.load(coord)
        }

        fn save(&self, coord: ChunkCoord, data: &ChunkData) -> Result<(), PersistenceError> {
            if take_failure(&self.save_failures) {
                return Err(PersistenceError::Io("disk full".into()));
            }
            self.inner.save(coord, data)
        }

        fn delete(&self, coord: ChunkCoord) -> Result<(), PersistenceError> {
            self.inner.delete(coord)
        }

        fn load_meta(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
            self.inner.load_meta()
        }

        fn save_meta(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
            self.inner.save_meta(bytes)
        }
    }

    fn quick_config(workers: usize) -> IoQueueConfig {
        IoQueueConfig {
            workers,
            retry_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }

    fn collect(queue: &IoQueue, count: usize) -> Vec<Completion> {
        (0..count)
            .map(|_| {
                queue
                    .recv_completion(Duration::from_secs(5))
                    .expect("completion in time")
            })
            .collect()
    }

    #[test]
    fn test_priority_order() {
        let mut queue_state = QueueState::default();
        let coord = ChunkCoord::ORIGIN;
        for (id, priority) in [(1, Priority::Low), (2, Priority::Critical), (3, Priority::Normal), (4, Priority::Critical)] {
            queue_state.heap.push(Request {
                id,
                coord: coord.offset(id as i32, 0),
                priority,
                job: Job::Load,
                ticket: Ticket::new(id, coord, RequestKind::Load),
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue_state.take_runnable().map(|r| r.id)).collect();
        assert_eq!(order, vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_busy_coordinate_is_skipped() {
        let mut state = QueueState::default();
        let busy = ChunkCoord::new(1, 1);
        state.busy.insert(busy);
        state.heap.push(Request {
            id: 1,
            coord: busy,
            priority: Priority::Critical,
            job: Job::Load,
            ticket: Ticket::new(1, busy, RequestKind::Load),
        });
        state.heap.push(Request {
            id: 2,
            coord: ChunkCoord::new(2, 2),
            priority: Priority::Low,
            job: Job::Load,
            ticket: Ticket::new(2, ChunkCoord::new(2, 2), RequestKind::Load),
        });

        assert_eq!(state.take_runnable().map(|r| r.id), Some(2));
        assert!(state.take_runnable().is_none());
        assert_eq!(state.heap.len(), 1);
    }

    #[test]
    fn test_load_missing_generates() {
        let generator = Arc::new(TestGenerator::new());
        let queue = IoQueue::new(
            quick_config(2),
            Arc::new(MemoryPersistence::new()),
            generator.clone(),
        )
        .expect("start queue");

        let ticket = queue.submit(ChunkCoord::new(4, 4), Job::Load, Priority::Normal);
        let completion = &collect(&queue, 1)[0];

        assert!(matches!(
            completion.outcome,
            Outcome::Loaded {
                source: LoadSource::Generated,
                ..
            }
        ));
        assert_eq!(ticket.poll(), Some(Ok(())));
        assert_eq!(generator.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_corrupt_data_regenerates() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.insert_raw(ChunkCoord::ORIGIN, vec![0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]);
        let queue = IoQueue::new(quick_config(1), persistence, Arc::new(TestGenerator::new()))
            .expect("start queue");

        queue.submit(ChunkCoord::ORIGIN, Job::Load, Priority::Normal);
        let completion = &collect(&queue, 1)[0];

        assert!(matches!(
            &completion.outcome,
            Outcome::Loaded {
                source: LoadSource::Regenerated(WorldError::CorruptData { coord, .. }),
                ..
            } if *coord == ChunkCoord::ORIGIN
        ));
    }

    #[test]
    fn test_load_io_failure_does_not_generate() {
        let persistence = Arc::new(FlakyPersistence::failing_loads(100));
        let generator = Arc::new(TestGenerator::new());
        let queue = IoQueue::new(quick_config(1), persistence.clone(), generator.clone())
            .expect("start queue");

        let ticket = queue.submit(ChunkCoord::new(2, -3), Job::Load, Priority::Normal);
        let completion = &collect(&queue, 1)[0];

        assert!(matches!(
            &completion.outcome,
            Outcome::LoadFailed(WorldError::Io { attempts: 3, coord, .. }) if *coord == ChunkCoord::new(2, -3)
        ));
        assert!(matches!(ticket.poll(), Some(Err(WorldError::Io { .. }))));
        assert_eq!(persistence.loads.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(generator.calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(queue.stats().failed_loads, 1);
        assert_eq!(queue.stats().retries, 2);
    }

    #[test]
    fn test_load_recovers_after_transient_failure() {
        let persistence = Arc::new(FlakyPersistence::failing_loads(1));
        persistence
            .inner
            .save(ChunkCoord::ORIGIN, &ChunkData::new(4))
            .expect("seed chunk");
        let generator = Arc::new(TestGenerator::new());
        let queue = IoQueue::new(quick_config(1), persistence.clone(), generator.clone())
            .expect("start queue");

        queue.submit(ChunkCoord::ORIGIN, Job::Load, Priority::Normal);
        let completion = &collect(&queue, 1)[0];

        assert!(matches!(
            completion.outcome,
            Outcome::Loaded {
                source: LoadSource::Disk,
                ..
            }
        ));
        assert_eq!(persistence.loads.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(generator.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_generation_failure_is_isolated() {
        let mut generator = TestGenerator::new();
        generator.fail_at = Some(ChunkCoord::new(9, 9));
        let queue = IoQueue::new(
            quick_config(2),
            Arc::new(MemoryPersistence::new()),
            Arc::new(generator),
        )
        .expect("start queue");

        let bad = queue.submit(ChunkCoord::new(9, 9), Job::Load, Priority::Normal);
        let good = queue.submit(ChunkCoord::new(0, 1), Job::Load, Priority::Normal);
        let _ = collect(&queue, 2);

        assert!(matches!(bad.poll(), Some(Err(WorldError::Generation { .. }))));
        assert_eq!(good.poll(), Some(Ok(())));
    }

    #[test]
    fn test_save_retries_then_succeeds() {
        let persistence = Arc::new(FlakyPersistence::new(2));
        let queue = IoQueue::new(
            quick_config(1),
            persistence.clone(),
            Arc::new(TestGenerator::new()),
        )
        .expect("start queue");

        let data = Arc::new(ChunkData::new(4));
        queue.submit(ChunkCoord::ORIGIN, Job::Save { data, version: 3 }, Priority::High);
        let completion = &collect(&queue, 1)[0];

        assert!(matches!(completion.outcome, Outcome::Saved { version: 3 }));
        assert_eq!(queue.stats().retries, 2);
        assert!(persistence.inner.contains(ChunkCoord::ORIGIN));
    }

    #[test]
    fn test_save_gives_up_after_bounded_retries() {
        let queue = IoQueue::new(
            quick_config(1),
            Arc::new(FlakyPersistence::new(10)),
            Arc::new(TestGenerator::new()),
        )
        .expect("start queue");

        let data = Arc::new(ChunkData::new(4));
        let ticket = queue.submit(ChunkCoord::ORIGIN, Job::Save { data, version: 1 }, Priority::High);
        let completion = &collect(&queue, 1)[0];

        assert!(matches!(
            completion.outcome,
            Outcome::SaveFailed {
                error: WorldError::Io { attempts: 3, .. },
                ..
            }
        ));
        assert!(matches!(ticket.poll(), Some(Err(WorldError::Io { .. }))));
    }

    #[test]
    fn test_same_coordinate_is_serialized() {
        let mut generator = TestGenerator::new();
        generator.delay = Duration::from_millis(20);
        let queue = IoQueue::new(
            quick_config(4),
            Arc::new(MemoryPersistence::new()),
            Arc::new(generator),
        )
        .expect("start queue");

        let coord = ChunkCoord::new(7, 7);
        let first = queue.submit(coord, Job::Generate { discard_saved: false }, Priority::Normal);
        let data = Arc::new(ChunkData::new(4));
        let second = queue.submit(coord, Job::Save { data, version: 1 }, Priority::Normal);

        let completions = collect(&queue, 2);
        assert_eq!(completions[0].request_id, first.request_id());
        assert_eq!(completions[1].request_id, second.request_id());
    }

    #[test]
    fn test_wait_refused_on_tick_thread() {
        let queue = IoQueue::new(
            quick_config(1),
            Arc::new(MemoryPersistence::new()),
            Arc::new(TestGenerator::new()),
        )
        .expect("start queue");
        let ticket = queue.submit(ChunkCoord::ORIGIN, Job::Load, Priority::Normal);

        {
            let _guard = TickThreadGuard::enter();
            assert!(is_tick_thread());
            assert!(matches!(
                ticket.wait(),
                Err(WorldError::ConcurrencyViolation(_))
            ));
        }

        assert!(!is_tick_thread());
        assert_eq!(ticket.wait(), Ok(()));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let mut queue = IoQueue::new(
            quick_config(1),
            Arc::new(MemoryPersistence::new()),
            Arc::new(TestGenerator::new()),
        )
        .expect("start queue");
        queue.shutdown();

        let ticket = queue.submit(ChunkCoord::ORIGIN, Job::Load, Priority::Normal);
        assert_eq!(ticket.poll(), Some(Err(WorldError::QueueClosed)));
    }
}
