//! # AgentForge Scheduler
//!
//! Durable task distribution: a persistent work queue, a cron/one-shot
//! scheduler that feeds it, and an autoscaling dispatcher that drains it.
//!
//! ## Design Principles
//! - SQLite is the single source of truth; nothing else holds queue state
//! - Claims are serialized, so no two workers ever get the same task
//! - Failures retry with exponential backoff until the attempt budget runs out
//! - Tokio timers only, zero overhead when idle
//!
//! ## Architecture
//! ```text
//! Schedule loop (tokio sleep)
//!   ├── once:  "in:30m"            → one pending task
//!   └── cron:  "0 8 * * MON-FRI"   → one pending task per occurrence
//!                 │
//!                 ▼
//! TaskStore (SQLite, WAL)
//!   tasks ─ pending → running → completed | failed
//!                 │        ▲
//!                 ▼        │ retry after 1s, 2s, 4s ... (max 5m)
//! Dispatcher
//!   ├── pool manager: reconcile workers to target, autoscale on backlog
//!   └── workers: claim → TaskProcessor → claim ...
//! ```

pub mod cron;
pub mod dispatcher;
pub mod engine;
pub mod loadtest;
pub mod persistence;
pub mod processor;
pub mod schedule;
pub mod tasks;

pub use dispatcher::{
    AutoscaleState, Dispatcher, DispatcherOptions, RunSummary, ShutdownHandle, ShutdownMode,
    WorkerStatus,
};
pub use engine::run_schedule_loop;
pub use loadtest::{LoadTestOptions, LoadTestReport, run_load_test};
pub use persistence::TaskStore;
pub use processor::{FnProcessor, SimulatedProcessor, TaskProcessor, processor_fn};
pub use schedule::{ScheduleSpec, parse_schedule_spec};
pub use tasks::{
    FailOutcome, NewSchedule, NewTask, QueueStats, ScheduleStatus, ScheduledTask, Task, TaskStatus,
    duration_from_secs,
};
