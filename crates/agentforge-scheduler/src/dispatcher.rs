//! Autoscaling dispatcher: a self-tuning pool of workers draining the task store.
//!
//! ```text
//! run()
//!   ├── manage tick (1s): reconcile live workers to target, then autoscale
//!   ├── drain tick (200ms): stop once the queue is drained twice in a row
//!   └── workers (JoinSet): claim → processor → claim ... → exit when idle and surplus
//! ```
//!
//! Workers never hold the pool lock across an await. On abort or a store
//! failure every worker is torn down and any task it still held is put back
//! to `pending`.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use agentforge_core::{ForgeError, Result, RuntimeConfig};

use crate::persistence::TaskStore;
use crate::processor::TaskProcessor;
use crate::tasks::{QueueStats, Task, TaskStatus, duration_from_secs};

/// Drained must be observed on this many consecutive checks.
const DRAIN_CONFIRMATIONS: u32 = 2;

/// Autoscaling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoscaleState {
    pub enabled: bool,
    pub max_concurrency: usize,
    pub scale_up_pending_per_worker: usize,
    pub scale_down_idle_cycles: u32,
}

impl AutoscaleState {
    pub fn from_runtime(cfg: &RuntimeConfig) -> Self {
        Self {
            enabled: cfg.autoscale.enabled,
            max_concurrency: cfg.max_concurrency.max(1),
            scale_up_pending_per_worker: cfg.autoscale.scale_up_pending_per_worker,
            scale_down_idle_cycles: cfg.autoscale.scale_down_idle_cycles,
        }
    }
}

/// Tuning knobs for one dispatcher run.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub initial_concurrency: usize,
    pub autoscale: AutoscaleState,
    /// Pool reconciliation + autoscale period.
    pub manage_interval: Duration,
    /// Sleep between claims when the queue is empty.
    pub idle_poll: Duration,
    pub drain_check: Duration,
    /// Requeue `running` tasks older than this before starting.
    pub orphan_grace: Option<chrono::Duration>,
}

impl DispatcherOptions {
    /// Options from runtime config; `initial` overrides `default_concurrency`.
    pub fn from_runtime(cfg: &RuntimeConfig, initial: Option<usize>) -> Self {
        Self {
            initial_concurrency: initial.unwrap_or(cfg.default_concurrency),
            autoscale: AutoscaleState::from_runtime(cfg),
            manage_interval: Duration::from_secs(1),
            idle_poll: Duration::from_millis(500),
            drain_check: Duration::from_millis(200),
            // a grace too large for a duration can never expire, same as disabled
            orphan_grace: (cfg.orphan_grace_secs > 0)
                .then(|| duration_from_secs(cfg.orphan_grace_secs).ok())
                .flatten(),
        }
    }

    pub fn autoscale_enabled(mut self, enabled: bool) -> Self {
        self.autoscale.enabled = enabled;
        self
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::from_runtime(&RuntimeConfig::default(), None)
    }
}

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Idle,
    Running(i64),
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => f.write_str("starting"),
            WorkerStatus::Idle => f.write_str("idle"),
            WorkerStatus::Running(id) => write!(f, "running:{id}"),
        }
    }
}

/// Cooperative stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Running,
    /// Stop claiming, let in-flight tasks finish.
    Drain,
    /// Tear down now, requeue in-flight tasks.
    Abort,
}

/// Cloneable handle to stop a running dispatcher from elsewhere (Ctrl-C, tests).
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<ShutdownMode>>,
}

impl ShutdownHandle {
    pub fn drain(&self) {
        self.tx.send_if_modified(|mode| {
            if *mode == ShutdownMode::Running {
                *mode = ShutdownMode::Drain;
                true
            } else {
                false
            }
        });
    }

    pub fn abort(&self) {
        self.tx.send_replace(ShutdownMode::Abort);
    }

    pub fn mode(&self) -> ShutdownMode {
        *self.tx.borrow()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub initial_target: usize,
    pub peak_target: usize,
    pub final_target: usize,
    pub workers_spawned: usize,
    pub tasks_claimed: usize,
    pub processor_errors: usize,
    pub duration_seconds: f64,
    pub stats: QueueStats,
}

struct WorkerSlot {
    status: WorkerStatus,
    idle_cycles: u32,
}

struct PoolState {
    target: usize,
    peak_target: usize,
    workers: BTreeMap<usize, WorkerSlot>,
    next_id: usize,
    spawned: usize,
}

impl PoolState {
    fn register_worker(&mut self) -> usize {
        self.next_id += 1;
        self.spawned += 1;
        self.workers.insert(
            self.next_id,
            WorkerSlot {
                status: WorkerStatus::Starting,
                idle_cycles: 0,
            },
        );
        self.next_id
    }

    fn set_target(&mut self, target: usize) {
        self.target = target;
        self.peak_target = self.peak_target.max(target);
    }
}

struct Shared {
    store: Arc<TaskStore>,
    processor: Arc<dyn TaskProcessor>,
    agent_model: String,
    autoscale: AutoscaleState,
    idle_poll: Duration,
    pool: Mutex<PoolState>,
    claimed: AtomicUsize,
    processor_errors: AtomicUsize,
}

impl Shared {
    fn pool(&self) -> MutexGuard<'_, PoolState> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn idle_threshold(&self) -> u32 {
        self.autoscale.scale_down_idle_cycles.max(1)
    }

    fn set_status(&self, worker_id: usize, status: WorkerStatus) {
        if let Some(slot) = self.pool().workers.get_mut(&worker_id) {
            if matches!(status, WorkerStatus::Running(_)) {
                slot.idle_cycles = 0;
            }
            slot.status = status;
        }
    }

    /// Count an empty claim. Returns `true` when the worker left the pool.
    fn idle_tick(&self, worker_id: usize) -> bool {
        let threshold = self.idle_threshold();
        let mut pool = self.pool();
        let surplus = pool.workers.len() > pool.target;
        let Some(slot) = pool.workers.get_mut(&worker_id) else {
            return true;
        };
        slot.status = WorkerStatus::Idle;
        slot.idle_cycles = slot.idle_cycles.saturating_add(1);
        if slot.idle_cycles >= threshold && surplus {
            pool.workers.remove(&worker_id);
            return true;
        }
        false
    }

    fn has_running_workers(&self) -> bool {
        self.pool()
            .workers
            .values()
            .any(|slot| matches!(slot.status, WorkerStatus::Running(_)))
    }

    /// Fail a task the processor returned without finishing, so it cannot pin the queue.
    fn settle_unrecorded(&self, task: &Task, reason: &str) {
        match self.store.get_task(task.id) {
            Ok(Some(current)) if current.status == TaskStatus::Running => {
                tracing::error!(
                    "🚨 Task {} left running by its processor, recording failure: {}",
                    task.id,
                    reason
                );
                if let Err(e) = self.store.fail_task(task, reason) {
                    tracing::error!("⚠️ Could not record failure for task {}: {e}", task.id);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("⚠️ Could not re-read task {}: {e}", task.id),
        }
    }
}

/// The dispatcher. Build one per run; call [`Dispatcher::run`] once.
pub struct Dispatcher {
    shared: Arc<Shared>,
    options: DispatcherOptions,
    shutdown_tx: Arc<watch::Sender<ShutdownMode>>,
    shutdown_rx: watch::Receiver<ShutdownMode>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<TaskStore>,
        processor: Arc<dyn TaskProcessor>,
        agent_model: impl Into<String>,
        options: DispatcherOptions,
    ) -> Self {
        let max = options.autoscale.max_concurrency.max(1);
        let target = options.initial_concurrency.clamp(1, max);
        let (tx, rx) = watch::channel(ShutdownMode::Running);
        let shared = Shared {
            store,
            processor,
            agent_model: agent_model.into(),
            autoscale: AutoscaleState {
                max_concurrency: max,
                ..options.autoscale
            },
            idle_poll: options.idle_poll,
            pool: Mutex::new(PoolState {
                target,
                peak_target: target,
                workers: BTreeMap::new(),
                next_id: 0,
                spawned: 0,
            }),
            claimed: AtomicUsize::new(0),
            processor_errors: AtomicUsize::new(0),
        };
        Self {
            shared: Arc::new(shared),
            options,
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    /// Build from runtime config; `initial` overrides `default_concurrency`.
    pub fn from_config(
        store: Arc<TaskStore>,
        processor: Arc<dyn TaskProcessor>,
        agent_model: impl Into<String>,
        cfg: &RuntimeConfig,
        initial: Option<usize>,
    ) -> Self {
        Self::new(store, processor, agent_model, DispatcherOptions::from_runtime(cfg, initial))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn target_concurrency(&self) -> usize {
        self.shared.pool().target
    }

    /// Snapshot of live workers, ordered by id.
    pub fn worker_statuses(&self) -> Vec<(usize, WorkerStatus)> {
        self.shared
            .pool()
            .workers
            .iter()
            .map(|(id, slot)| (*id, slot.status))
            .collect()
    }

    /// Drain the queue. Returns once it is empty and all workers have stopped,
    /// or `Err(Aborted)` after an abort (in-flight tasks requeued).
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let initial_target = self.target_concurrency();

        if *self.shutdown_rx.borrow() == ShutdownMode::Abort {
            tracing::warn!("🛑 Dispatcher aborted before start");
            return Err(ForgeError::Aborted("dispatcher aborted before start".into()));
        }
        if let Some(grace) = self.options.orphan_grace {
            self.shared.store.recover_orphaned(grace)?;
        }

        tracing::info!(
            "🏭 Dispatcher started: {} worker(s), autoscale {}, model {}",
            initial_target,
            if self.shared.autoscale.enabled { "on" } else { "off" },
            self.shared.agent_model
        );

        let mut workers = JoinSet::new();
        let outcome = match self.drive(&mut workers).await {
            Ok(()) => self.join_workers(&mut workers).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            self.teardown(&mut workers).await;
            tracing::warn!("🛑 Dispatcher stopped: {e}");
            return Err(e);
        }

        let stats = self.shared.store.stats()?;
        let pool = self.shared.pool();
        let summary = RunSummary {
            initial_target,
            peak_target: pool.peak_target,
            final_target: pool.target,
            workers_spawned: pool.spawned,
            tasks_claimed: self.shared.claimed.load(Ordering::Relaxed),
            processor_errors: self.shared.processor_errors.load(Ordering::Relaxed),
            duration_seconds: started.elapsed().as_secs_f64(),
            stats,
        };
        drop(pool);
        tracing::info!(
            "🏁 Dispatcher finished: {} claimed, {} completed, {} failed, peak {} worker(s)",
            summary.tasks_claimed,
            summary.stats.completed,
            summary.stats.failed,
            summary.peak_target
        );
        Ok(summary)
    }

    /// Manage the pool until drained or a stop is requested.
    async fn drive(&self, workers: &mut JoinSet<()>) -> Result<()> {
        let mut rx = self.shutdown_rx.clone();
        let mut manage = tokio::time::interval(self.options.manage_interval);
        manage.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drain_check = tokio::time::interval(self.options.drain_check);
        drain_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drained_checks = 0;

        loop {
            tokio::select! {
                _ = manage.tick() => self.manage_pool(workers),
                _ = drain_check.tick() => {
                    let stats = self.shared.store.stats()?;
                    if stats.is_drained() && !self.shared.has_running_workers() {
                        drained_checks += 1;
                        if drained_checks >= DRAIN_CONFIRMATIONS {
                            tracing::info!("✨ Queue drained");
                            return Ok(());
                        }
                    } else {
                        drained_checks = 0;
                    }
                }
                _ = rx.changed() => match *rx.borrow_and_update() {
                    ShutdownMode::Abort => return Err(ForgeError::Aborted("dispatcher aborted".into())),
                    ShutdownMode::Drain => {
                        tracing::info!("⏳ Drain requested, finishing in-flight tasks");
                        return Ok(());
                    }
                    ShutdownMode::Running => {}
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => log_join(joined),
            }
        }
    }

    /// Reconcile the live pool to the target, then autoscale.
    fn manage_pool(&self, workers: &mut JoinSet<()>) {
        let threshold = self.shared.idle_threshold();
        let spawn_ids: Vec<usize> = {
            let mut pool = self.shared.pool();
            let live = pool.workers.len();
            if live < pool.target {
                (live..pool.target).map(|_| pool.register_worker()).collect()
            } else {
                if live > pool.target {
                    // idle workers first, then whoever is busy
                    let excess = live - pool.target;
                    let mut slots: Vec<&mut WorkerSlot> = pool.workers.values_mut().collect();
                    slots.sort_by_key(|slot| matches!(slot.status, WorkerStatus::Running(_)));
                    for slot in slots.into_iter().take(excess) {
                        slot.idle_cycles = slot.idle_cycles.max(threshold);
                    }
                }
                Vec::new()
            }
        };

        for id in spawn_ids {
            let shared = self.shared.clone();
            let shutdown = self.shutdown_rx.clone();
            workers.spawn(
                worker_loop(shared, id, shutdown).instrument(tracing::info_span!("worker", id)),
            );
        }

        if self.shared.autoscale.enabled {
            self.evaluate_autoscale();
        }
    }

    fn evaluate_autoscale(&self) {
        let pending = match self.shared.store.pending_count() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("⚠️ Autoscale skipped, cannot count pending tasks: {e}");
                return;
            }
        };
        let autoscale = &self.shared.autoscale;
        let mut pool = self.shared.pool();
        let live = pool.workers.len();
        if pending == 0 && live <= 1 {
            return;
        }

        let active = live.max(1);
        let threshold = active * autoscale.scale_up_pending_per_worker.max(1);
        let previous = pool.target;
        if pending > threshold && pool.target < autoscale.max_concurrency {
            let step = (pending / threshold).max(1);
            let next = (pool.target + step).min(autoscale.max_concurrency);
            pool.set_target(next);
            tracing::info!(
                "📈 Autoscale: {} pending, {} live → target {} → {}",
                pending,
                live,
                previous,
                pool.target
            );
        } else if pending < active && pool.target > 1 {
            let next = pool.target - 1;
            pool.set_target(next);
            tracing::info!(
                "📉 Autoscale: {} pending, {} live → target {} → {}",
                pending,
                live,
                previous,
                pool.target
            );
        }
    }

    /// Let workers finish in-flight work. An abort while waiting escalates.
    async fn join_workers(&self, workers: &mut JoinSet<()>) -> Result<()> {
        self.shutdown_tx.send_if_modified(|mode| {
            if *mode == ShutdownMode::Running {
                *mode = ShutdownMode::Drain;
                true
            } else {
                false
            }
        });
        let mut rx = self.shutdown_rx.clone();
        loop {
            if *rx.borrow_and_update() == ShutdownMode::Abort {
                return Err(ForgeError::Aborted("dispatcher aborted while draining".into()));
            }
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(joined) => log_join(joined),
                    None => return Ok(()),
                },
                _ = rx.changed() => {}
            }
        }
    }

    /// Abort every worker and put their in-flight tasks back to `pending`.
    async fn teardown(&self, workers: &mut JoinSet<()>) {
        self.shutdown_tx.send_replace(ShutdownMode::Abort);
        workers.abort_all();
        while let Some(joined) = workers.join_next().await {
            log_join(joined);
        }

        let in_flight: Vec<i64> = {
            let mut pool = self.shared.pool();
            let ids = pool
                .workers
                .values()
                .filter_map(|slot| match slot.status {
                    WorkerStatus::Running(task_id) => Some(task_id),
                    _ => None,
                })
                .collect();
            pool.workers.clear();
            ids
        };
        for task_id in in_flight {
            if let Err(e) = self.shared.store.release_task(task_id) {
                tracing::error!("⚠️ Could not requeue in-flight task {}: {e}", task_id);
            }
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, id: usize, mut shutdown: watch::Receiver<ShutdownMode>) {
    tracing::info!("🤖 Worker {:03} spawned", id);
    loop {
        if *shutdown.borrow_and_update() != ShutdownMode::Running {
            break;
        }

        let task = match shared.store.claim_task() {
            Ok(Some(task)) => task,
            Ok(None) => {
                if shared.idle_tick(id) {
                    tracing::info!("📉 Worker {:03} idle and surplus, exiting", id);
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(shared.idle_poll) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            Err(e) => {
                tracing::warn!("⚠️ Claim failed: {e}");
                if shared.idle_tick(id) {
                    tracing::info!("📉 Worker {:03} surplus after claim errors, exiting", id);
                    break;
                }
                tokio::time::sleep(shared.idle_poll).await;
                continue;
            }
        };

        shared.set_status(id, WorkerStatus::Running(task.id));
        shared.claimed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("📌 Task {} claimed: {}", task.id, task.description);

        let outcome = AssertUnwindSafe(shared.processor.process(
            id,
            &shared.store,
            &task,
            &shared.agent_model,
        ))
        .catch_unwind()
        .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Task {} processor error: {e:#}", task.id);
                Some(format!("processor error: {e:#}"))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::warn!("💥 Task {} processor panicked: {}", task.id, msg);
                Some(format!("processor panicked: {msg}"))
            }
        };
        if failure.is_some() {
            shared.processor_errors.fetch_add(1, Ordering::Relaxed);
        }
        shared.settle_unrecorded(
            &task,
            failure
                .as_deref()
                .unwrap_or("processor returned without recording an outcome"),
        );
        shared.set_status(id, WorkerStatus::Idle);
    }

    shared.pool().workers.remove(&id);
    tracing::info!("💤 Worker {:03} stopped", id);
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    match joined {
        Err(e) if !e.is_cancelled() => tracing::error!("⚠️ Worker task failed: {e}"),
        _ => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{SimulatedProcessor, processor_fn};
    use crate::tasks::NewTask;

    fn fast_options(initial: usize) -> DispatcherOptions {
        DispatcherOptions {
            initial_concurrency: initial,
            autoscale: AutoscaleState {
                enabled: false,
                max_concurrency: 50,
                scale_up_pending_per_worker: 2,
                scale_down_idle_cycles: 3,
            },
            manage_interval: Duration::from_millis(10),
            idle_poll: Duration::from_millis(10),
            drain_check: Duration::from_millis(10),
            orphan_grace: None,
        }
    }

    fn store_with(n: usize) -> Arc<TaskStore> {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        for i in 0..n {
            store.add_task(NewTask::new(format!("task {i}"))).unwrap();
        }
        store
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_worker_status_display() {
        assert_eq!(WorkerStatus::Starting.to_string(), "starting");
        assert_eq!(WorkerStatus::Idle.to_string(), "idle");
        assert_eq!(WorkerStatus::Running(42).to_string(), "running:42");
    }

    #[test]
    fn test_initial_target_clamped() {
        let store = store_with(0);
        let processor = Arc::new(SimulatedProcessor::default());
        let d = Dispatcher::new(store.clone(), processor.clone(), "m", fast_options(0));
        assert_eq!(d.target_concurrency(), 1);
        let d = Dispatcher::new(store, processor, "m", fast_options(10_000));
        assert_eq!(d.target_concurrency(), 50);
    }

    #[test]
    fn test_options_from_runtime() {
        let cfg = RuntimeConfig::default();
        let opts = DispatcherOptions::from_runtime(&cfg, Some(4));
        assert_eq!(opts.initial_concurrency, 4);
        assert_eq!(opts.autoscale.max_concurrency, 500);
        assert_eq!(opts.orphan_grace, Some(chrono::Duration::seconds(300)));
        assert!(!opts.autoscale_enabled(false).autoscale.enabled);

        let cfg = RuntimeConfig {
            orphan_grace_secs: u64::MAX,
            ..RuntimeConfig::default()
        };
        assert_eq!(DispatcherOptions::from_runtime(&cfg, None).orphan_grace, None);
    }

    #[tokio::test]
    async fn test_drains_small_queue() {
        let store = store_with(5);
        let d = Dispatcher::new(store.clone(), Arc::new(SimulatedProcessor::default()), "haiku", fast_options(2));
        let summary = d.run().await.unwrap();

        assert_eq!(summary.stats.completed, 5);
        assert_eq!(summary.tasks_claimed, 5);
        assert_eq!(summary.processor_errors, 0);
        assert!(summary.stats.is_drained());
        assert!(d.worker_statuses().is_empty());
        let results: Vec<_> = store.list_tasks(None).unwrap().into_iter().map(|t| t.result).collect();
        assert!(results.iter().all(|r| r.as_deref() == Some("Completed with haiku")));
    }

    #[tokio::test]
    async fn test_empty_queue_returns() {
        let store = store_with(0);
        let d = Dispatcher::new(store, Arc::new(SimulatedProcessor::default()), "m", fast_options(3));
        let summary = d.run().await.unwrap();
        assert_eq!(summary.tasks_claimed, 0);
        assert_eq!(summary.stats.total, 0);
    }

    #[tokio::test]
    async fn test_autoscale_grows_under_backlog() {
        let store = store_with(50);
        let processor = Arc::new(SimulatedProcessor::new(Duration::from_millis(20)));
        let mut opts = fast_options(1);
        opts.autoscale.enabled = true;
        let d = Dispatcher::new(store.clone(), processor, "m", opts);

        let summary = d.run().await.unwrap();
        assert_eq!(summary.stats.completed, 50);
        assert_eq!(summary.initial_target, 1);
        assert!(summary.peak_target > 1, "peak {}", summary.peak_target);
        assert!(summary.workers_spawned > 1);
        assert!(summary.peak_target <= 50);
    }

    #[tokio::test]
    async fn test_abort_requeues_in_flight() {
        let store = store_with(3);
        let processor = Arc::new(processor_fn(|_, _, _, _| std::future::pending::<anyhow::Result<()>>()));
        let d = Arc::new(Dispatcher::new(store.clone(), processor, "m", fast_options(3)));
        let handle = d.shutdown_handle();

        let runner = tokio::spawn({
            let d = d.clone();
            async move { d.run().await }
        });
        wait_for(|| store.stats().unwrap().running == 3).await;

        handle.abort();
        let result = tokio::time::timeout(Duration::from_secs(10), runner).await.unwrap().unwrap();
        assert!(matches!(result, Err(ForgeError::Aborted(_))));

        let stats = store.stats().unwrap();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.pending, 3);
        assert!(store.list_tasks(None).unwrap().iter().all(|t| t.attempts == 0));
    }

    #[tokio::test]
    async fn test_abort_before_start() {
        let store = store_with(4);
        let d = Dispatcher::new(store.clone(), Arc::new(SimulatedProcessor::default()), "m", fast_options(2));
        d.shutdown_handle().abort();
        assert!(matches!(d.run().await, Err(ForgeError::Aborted(_))));
        assert_eq!(store.stats().unwrap().pending, 4);
    }

    #[tokio::test]
    async fn test_drain_finishes_in_flight_only() {
        let store = store_with(4);
        let processor = Arc::new(processor_fn(|_, store: Arc<TaskStore>, task: Task, _| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store.complete_task(task.id, "done")?;
            Ok(())
        }));
        let d = Arc::new(Dispatcher::new(store.clone(), processor, "m", fast_options(1)));
        let handle = d.shutdown_handle();
        let runner = tokio::spawn({
            let d = d.clone();
            async move { d.run().await }
        });

        wait_for(|| store.stats().unwrap().running == 1).await;
        handle.drain();
        let summary = runner.await.unwrap().unwrap();
        assert_eq!(summary.stats.completed, 1);
        assert_eq!(summary.stats.pending, 3);
        assert_eq!(summary.stats.running, 0);
    }

    #[tokio::test]
    async fn test_processor_failures_do_not_kill_worker() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        for desc in ["ok-1", "error", "panic", "ok-2"] {
            store.add_task(NewTask::new(desc).max_attempts(1)).unwrap();
        }
        let processor = Arc::new(processor_fn(|_, store: Arc<TaskStore>, task: Task, _| async move {
            match task.description.as_str() {
                "error" => anyhow::bail!("model unavailable"),
                "panic" => panic!("processor bug"),
                _ => {
                    store.complete_task(task.id, "ok")?;
                    Ok(())
                }
            }
        }));
        let d = Dispatcher::new(store.clone(), processor, "m", fast_options(1));

        let summary = d.run().await.unwrap();
        assert_eq!(summary.workers_spawned, 1);
        assert_eq!(summary.processor_errors, 2);
        assert_eq!(summary.stats.completed, 2);
        assert_eq!(summary.stats.failed, 2);

        let failed: Vec<Task> = store
            .list_tasks(None)
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        assert!(failed[0].last_error.as_deref().unwrap().contains("model unavailable"));
        assert!(failed[1].last_error.as_deref().unwrap().contains("processor bug"));
    }

    #[tokio::test]
    async fn test_recovers_orphans_on_start() {
        let store = store_with(0);
        let now = chrono::Utc::now();
        store
            .add_task(NewTask::new("orphan").available_at(now - chrono::Duration::hours(2)))
            .unwrap();
        // claimed an hour ago by a process that died
        store.claim_task_at(now - chrono::Duration::hours(1)).unwrap().unwrap();
        let mut opts = fast_options(1);
        opts.orphan_grace = Some(chrono::Duration::seconds(60));
        let d = Dispatcher::new(store.clone(), Arc::new(SimulatedProcessor::default()), "m", opts);

        let summary = d.run().await.unwrap();
        assert_eq!(summary.stats.completed, 1);
        assert_eq!(store.list_tasks(None).unwrap()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_future_tasks_do_not_hold_run_open() {
        let store = store_with(1);
        let tomorrow = chrono::Utc::now() + chrono::Duration::days(1);
        store.add_task(NewTask::new("tomorrow").available_at(tomorrow)).unwrap();
        let d = Dispatcher::new(store, Arc::new(SimulatedProcessor::default()), "m", fast_options(1));

        let summary = tokio::time::timeout(Duration::from_secs(10), d.run())
            .await
            .expect("run waited for a future-dated task")
            .unwrap();
        assert_eq!(summary.stats.completed, 1);
        assert_eq!(summary.stats.delayed, 1);
        assert_eq!(summary.stats.retrying, 0);
    }

    #[tokio::test]
    async fn test_surplus_worker_exits_on_claim_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let store = Arc::new(TaskStore::open(&path).unwrap());
        let mut opts = fast_options(1);
        opts.autoscale.scale_down_idle_cycles = 1;
        let d = Dispatcher::new(store, Arc::new(SimulatedProcessor::default()), "m", opts);
        {
            let mut pool = d.shared.pool();
            pool.register_worker();
            pool.register_worker();
            pool.set_target(1);
        }

        // every claim fails from here on
        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("DROP TABLE tasks").unwrap();
        drop(other);

        tokio::time::timeout(Duration::from_secs(5), worker_loop(d.shared.clone(), 2, d.shutdown_rx.clone()))
            .await
            .expect("surplus worker kept running outside the pool");
        assert_eq!(d.worker_statuses(), vec![(1, WorkerStatus::Starting)]);
    }
}
