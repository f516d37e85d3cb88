//! Load test: floods the queue and drains it with an autoscaling pool of
//! simulated agents, then writes a JSON report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use agentforge_core::{ForgeError, Result, RuntimeConfig};

use crate::dispatcher::{Dispatcher, DispatcherOptions};
use crate::persistence::TaskStore;
use crate::processor::SimulatedProcessor;
use crate::tasks::{NewTask, QueueStats};

/// Load test parameters.
#[derive(Debug, Clone)]
pub struct LoadTestOptions {
    /// Concurrent agents requested (capped at `max_concurrency`).
    pub agents: usize,
    /// Outstanding tasks to have in the queue before starting.
    pub tasks: usize,
    /// Delete the task database first.
    pub reset: bool,
    pub report_path: PathBuf,
    /// Simulated per-task latency.
    pub latency: Duration,
}

impl LoadTestOptions {
    pub fn new(report_path: impl Into<PathBuf>) -> Self {
        Self {
            agents: 100,
            tasks: 200,
            reset: false,
            report_path: report_path.into(),
            latency: Duration::from_millis(50),
        }
    }
}

/// What the load test writes to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub agents_requested: usize,
    pub concurrency_used: usize,
    pub tasks: usize,
    pub duration_seconds: f64,
    pub queue_stats: QueueStats,
    pub peak_concurrency: usize,
    pub timestamp: String,
}

/// Run a load test against the database at `store_path`.
pub async fn run_load_test(
    store_path: &Path,
    options: LoadTestOptions,
    runtime: &RuntimeConfig,
    agent_model: &str,
) -> Result<LoadTestReport> {
    if options.reset {
        reset_database(store_path)?;
    }

    let store = Arc::new(TaskStore::open(store_path)?);
    let stats = store.stats()?;
    let outstanding = stats.pending + stats.delayed + stats.running;
    let remaining = options.tasks.saturating_sub(outstanding);
    for idx in 0..remaining {
        store.add_task(NewTask::new(format!("loadtest task {idx}")))?;
    }
    tracing::info!(
        "🧪 Load test: {} agent(s) requested, {} task(s) ({} enqueued now)",
        options.agents,
        options.tasks,
        remaining
    );

    let concurrency = options.agents.min(runtime.max_concurrency).max(1);
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(SimulatedProcessor::new(options.latency)),
        agent_model,
        DispatcherOptions::from_runtime(runtime, Some(concurrency)).autoscale_enabled(true),
    );
    let summary = dispatcher.run().await?;

    let report = LoadTestReport {
        agents_requested: options.agents,
        concurrency_used: concurrency,
        tasks: options.tasks,
        duration_seconds: summary.duration_seconds,
        queue_stats: store.stats()?,
        peak_concurrency: summary.peak_target,
        timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    };

    if let Some(parent) = options.report_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| ForgeError::Serialization(e.to_string()))?;
    std::fs::write(&options.report_path, json)?;

    tracing::info!(
        "📊 Load test completed: agents={}, tasks={}, duration={:.2}s, report {}",
        options.agents,
        options.tasks,
        report.duration_seconds,
        options.report_path.display()
    );
    Ok(report)
}

/// Remove the database file and its WAL sidecars.
fn reset_database(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets.iter().filter(|p| p.exists()) {
        std::fs::remove_file(target)?;
    }
    tracing::info!("🗑️ Task database reset: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_runtime() -> RuntimeConfig {
        RuntimeConfig {
            max_concurrency: 8,
            orphan_grace_secs: 0,
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_load_test_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data").join("tasks.db");
        let report_path = dir.path().join("reports").join("loadtest.json");

        let mut options = LoadTestOptions::new(&report_path);
        options.agents = 20;
        options.tasks = 30;
        options.latency = Duration::from_millis(5);

        let report = run_load_test(&db, options, &quick_runtime(), "haiku").await.unwrap();
        assert_eq!(report.concurrency_used, 8);
        assert_eq!(report.agents_requested, 20);
        assert_eq!(report.queue_stats.completed, 30);
        assert!(report.peak_concurrency >= 8);

        let written: LoadTestReport =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(written.tasks, 30);
        assert_eq!(written.queue_stats.completed, 30);
    }

    #[tokio::test]
    async fn test_reset_starts_from_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tasks.db");
        {
            let store = TaskStore::open(&db).unwrap();
            store.add_task(NewTask::new("leftover")).unwrap();
            store.close().unwrap();
        }

        let mut options = LoadTestOptions::new(dir.path().join("report.json"));
        options.agents = 2;
        options.tasks = 3;
        options.reset = true;
        options.latency = Duration::ZERO;

        let report = run_load_test(&db, options, &quick_runtime(), "m").await.unwrap();
        assert_eq!(report.queue_stats.total, 3);
        assert_eq!(report.queue_stats.completed, 3);
    }
}
