//! Task definitions: the core data model for queued and scheduled work.

use agentforge_core::{ForgeError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for retry backoff (5 minutes).
pub const MAX_BACKOFF_SECS: i64 = 300;

/// Default retry budget for a new task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in the live queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// Opaque payload handed to the processor.
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Model hint forwarded to the processor.
    pub agent_model: Option<String>,
    pub result: Option<String>,
    pub last_error: Option<String>,
    /// Claims so far, including the current one while `Running`.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time the task may be claimed.
    pub available_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    /// Higher claims first.
    pub priority: i64,
}

impl Task {
    /// Whether a failure right now would be retried.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Parameters for enqueuing a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub description: String,
    pub agent_model: Option<String>,
    pub idempotency_key: Option<String>,
    pub max_attempts: u32,
    pub priority: i64,
    /// `None` means "now".
    pub available_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            agent_model: None,
            idempotency_key: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority: 0,
            available_at: None,
        }
    }

    pub fn agent_model(mut self, model: impl Into<String>) -> Self {
        self.agent_model = Some(model.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }
}

/// Outcome of reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to `pending`, claimable from `available_at`.
    Retrying { available_at: DateTime<Utc> },
    /// Retry budget spent; the task is permanently `failed`.
    Exhausted,
}

/// Backoff before the next attempt, given the attempts consumed so far
/// (including the one that just failed): 1s, 2s, 4s, ... capped at 5 minutes.
pub fn retry_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1);
    let secs = if exponent >= 16 {
        MAX_BACKOFF_SECS
    } else {
        (1_i64 << exponent).min(MAX_BACKOFF_SECS)
    };
    Duration::seconds(secs)
}

/// Whole seconds from user input or config as a duration.
pub fn duration_from_secs(secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ForgeError::invalid(format!("{secs} seconds is out of range")))
}

/// Scheduled task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Waiting for its next due time.
    Pending,
    /// One-shot definition already emitted.
    Released,
    /// Recurring definition that reached `max_runs`.
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Released => "released",
            ScheduleStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScheduleStatus::Pending),
            "released" => Some(ScheduleStatus::Released),
            "completed" => Some(ScheduleStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deferred or recurring task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub description: String,
    /// Next due time (UTC).
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    /// Presence makes the definition recurring.
    pub cron_expression: Option<String>,
    /// Zone the cron rule is evaluated in.
    pub timezone: String,
    pub run_count: u32,
    pub max_runs: Option<u32>,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.scheduled_for <= now
    }
}

/// Parameters for registering a scheduled task.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub description: String,
    pub scheduled_for: DateTime<Utc>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub max_runs: Option<u32>,
}

impl NewSchedule {
    /// One-shot definition due at `at`.
    pub fn once(description: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            description: description.into(),
            scheduled_for: at,
            cron_expression: None,
            timezone: None,
            max_runs: None,
        }
    }

    /// Recurring definition whose first occurrence is `first_run`.
    pub fn cron(
        description: impl Into<String>,
        first_run: DateTime<Utc>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            scheduled_for: first_run,
            cron_expression: Some(expression.into()),
            timezone: None,
            max_runs: None,
        }
    }

    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    /// Pending and claimable now.
    pub pending: usize,
    /// Pending but waiting out a delay or retry backoff.
    pub delayed: usize,
    /// The part of `delayed` waiting out a retry backoff.
    #[serde(default)]
    pub retrying: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Nothing claimable, in flight, or backing off. Tasks enqueued for a
    /// later time do not hold a run open.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.retrying == 0 && self.running == 0
    }
}
