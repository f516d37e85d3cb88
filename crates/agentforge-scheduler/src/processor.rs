//! Processor seam: the only place task payloads are executed.
//!
//! The dispatcher hands each claimed task to a [`TaskProcessor`] exactly once.
//! The processor owns the outcome: it must call `complete_task` or `fail_task`
//! on the store before returning. An `Err` is logged by the worker, which then
//! moves on. A recorded outcome is never touched; a task still `running` after
//! the call is a contract violation and the worker fails it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::persistence::TaskStore;
use crate::tasks::Task;

/// Executes the payload of one claimed task.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(
        &self,
        worker_id: usize,
        store: &Arc<TaskStore>,
        task: &Task,
        agent_model: &str,
    ) -> anyhow::Result<()>;
}

/// Adapts an async closure taking owned arguments.
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap `f(worker_id, store, task, agent_model)` as a processor.
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(usize, Arc<TaskStore>, Task, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> TaskProcessor for FnProcessor<F>
where
    F: Fn(usize, Arc<TaskStore>, Task, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn process(
        &self,
        worker_id: usize,
        store: &Arc<TaskStore>,
        task: &Task,
        agent_model: &str,
    ) -> anyhow::Result<()> {
        (self.f)(worker_id, store.clone(), task.clone(), agent_model.to_string()).await
    }
}

/// Built-in stand-in for a real agent: verifies the payload is non-empty,
/// waits out a simulated latency, then completes the task.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProcessor {
    latency: Duration,
}

impl SimulatedProcessor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl TaskProcessor for SimulatedProcessor {
    async fn process(
        &self,
        worker_id: usize,
        store: &Arc<TaskStore>,
        task: &Task,
        agent_model: &str,
    ) -> anyhow::Result<()> {
        tracing::debug!("🔧 Task {}: execution started on worker {}", task.id, worker_id);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if task.description.trim().is_empty() {
            tracing::warn!("🔍 Task {}: logical verification FAILED", task.id);
            store.fail_task(task, "Logical verification failed: empty description")?;
            return Ok(());
        }

        store.complete_task(task.id, &format!("Completed with {agent_model}"))?;
        tracing::debug!("✔️ Task {}: verification passed", task.id);
        Ok(())
    }
}
