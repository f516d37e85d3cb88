//! SQLite-backed task store: the single shared source of truth for the live
//! queue and the scheduled definitions that feed it.
//!
//! One connection behind one mutex: every operation is a short critical
//! section, and multi-statement operations run inside a single IMMEDIATE
//! transaction so another process sharing the file cannot interleave a claim.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use agentforge_core::{ForgeError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::cron;
use crate::tasks::{
    DEFAULT_MAX_ATTEMPTS, FailOutcome, NewSchedule, NewTask, QueueStats, ScheduleStatus,
    ScheduledTask, Task, TaskStatus, retry_delay,
};

const CREATE_TASKS_SQL: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    agent_model TEXT,
    result TEXT
);";

const CREATE_SCHEDULE_SQL: &str = "
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    scheduled_for TEXT NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
);";

/// Columns added after the first release, applied in order when missing.
const TASK_MIGRATIONS: &[(&str, &str)] = &[
    ("last_error", "TEXT"),
    ("attempts", "INTEGER NOT NULL DEFAULT 0"),
    ("max_attempts", "INTEGER NOT NULL DEFAULT 3"),
    ("available_at", "TEXT"),
    ("idempotency_key", "TEXT"),
    ("priority", "INTEGER NOT NULL DEFAULT 0"),
];

const SCHEDULE_MIGRATIONS: &[(&str, &str)] = &[
    ("cron_expression", "TEXT"),
    ("timezone", "TEXT NOT NULL DEFAULT 'UTC'"),
    ("run_count", "INTEGER NOT NULL DEFAULT 0"),
    ("max_runs", "INTEGER"),
    ("last_run", "TEXT"),
];

const CREATE_INDEXES_SQL: &str = "
CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_idempotency_key
    ON tasks(idempotency_key) WHERE idempotency_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_tasks_claim
    ON tasks(status, priority DESC, available_at, id);
CREATE INDEX IF NOT EXISTS idx_scheduled_due
    ON scheduled_tasks(status, scheduled_for);
";

const TASK_COLUMNS: &str = "id, description, status, created_at, updated_at, agent_model, result, \
     last_error, attempts, max_attempts, available_at, idempotency_key, priority";

const SCHEDULE_COLUMNS: &str = "id, description, scheduled_for, created_at, status, \
     cron_expression, timezone, run_count, max_runs, last_run";

/// Durable, thread-safe table of tasks and scheduled-task definitions.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create the task database at `path`, migrating it to the current schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // WAL lets the dashboard and CLI read while a dispatcher writes
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            tracing::warn!("⚠️ Could not enable WAL on {}: {e}", path.display());
        }
        let store = Self::from_connection(conn)?;
        tracing::debug!("🗄️ Task store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory store (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Close the underlying connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| ForgeError::Database(format!("Lock: {e}")))?;
        conn.close().map_err(|(_, e)| e.into())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ForgeError::Database(format!("Lock: {e}")))
    }

    // ─── Live queue ──────────────────────────────────────────

    /// Enqueue a task. A repeated idempotency key returns the existing id.
    pub fn add_task(&self, new: NewTask) -> Result<i64> {
        if new.max_attempts < 1 {
            return Err(ForgeError::invalid("max_attempts must be >= 1"));
        }
        if new
            .idempotency_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(ForgeError::invalid("idempotency key must not be empty"));
        }

        let now = Utc::now();
        let available_at = new.available_at.unwrap_or(now);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(key) = &new.idempotency_key {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM tasks WHERE idempotency_key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                tracing::debug!("♻️ Idempotency key '{}' already enqueued as task {}", key, id);
                return Ok(id);
            }
        }

        tx.execute(
            "INSERT INTO tasks (description, status, created_at, updated_at, agent_model,
                                attempts, max_attempts, available_at, idempotency_key, priority)
             VALUES (?1, 'pending', ?2, ?2, ?3, 0, ?4, ?5, ?6, ?7)",
            params![
                new.description,
                fmt_ts(now),
                new.agent_model,
                new.max_attempts,
                fmt_ts(available_at),
                new.idempotency_key,
                new.priority,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        drop(conn);

        tracing::info!("📥 Task {} added: {}", id, new.description);
        Ok(id)
    }

    /// Tasks ordered by id ascending.
    pub fn list_tasks(&self, limit: Option<usize>) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY id LIMIT ?1"
        ))?;
        let tasks = stmt
            .query_map([sql_limit(limit)], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Claim the next eligible task, or `None` when nothing is claimable.
    pub fn claim_task(&self) -> Result<Option<Task>> {
        self.claim_task_at(Utc::now())
    }

    /// Claim as of `now`: priority desc, then `available_at` asc, then id asc.
    pub fn claim_task_at(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE status = 'pending' AND available_at <= ?1
                     ORDER BY priority DESC, available_at ASC, id ASC
                     LIMIT 1"
                ),
                [fmt_ts(now)],
                task_from_row,
            )
            .optional()?;
        let Some(mut task) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE tasks
             SET status = 'running', attempts = attempts + 1, last_error = NULL, updated_at = ?1
             WHERE id = ?2",
            params![fmt_ts(now), task.id],
        )?;
        tx.commit()?;

        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.last_error = None;
        task.updated_at = now;
        tracing::debug!(
            "🎯 Task {} claimed (attempt {}/{})",
            task.id,
            task.attempts,
            task.max_attempts
        );
        Ok(Some(task))
    }

    /// Mark a task completed. Calling it again just overwrites the result.
    pub fn complete_task(&self, id: i64, result: &str) -> Result<()> {
        let now = Utc::now();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET status = 'completed', result = ?1, last_error = NULL, updated_at = ?2
             WHERE id = ?3",
            params![result, fmt_ts(now), id],
        )?;
        drop(conn);
        if changed == 0 {
            return Err(ForgeError::not_found("Task", id));
        }
        tracing::info!("✅ Task {} completed", id);
        Ok(())
    }

    /// Apply the retry policy to a failed attempt, using the caller's claim snapshot.
    pub fn fail_task(&self, task: &Task, reason: &str) -> Result<FailOutcome> {
        self.fail_task_at(task, reason, Utc::now())
    }

    pub fn fail_task_at(&self, task: &Task, reason: &str, now: DateTime<Utc>) -> Result<FailOutcome> {
        let conn = self.lock()?;
        let current: Option<String> = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", [task.id], |row| row.get(0))
            .optional()?;
        let Some(current) = current else {
            return Err(ForgeError::not_found("Task", task.id));
        };
        if TaskStatus::parse(&current).is_some_and(|status| status.is_terminal()) {
            return Err(ForgeError::invalid(format!(
                "task {} is already {current}, refusing to record a failure",
                task.id
            )));
        }
        let (changed, outcome) = if task.can_retry() {
            let available_at = now + retry_delay(task.attempts);
            let changed = conn.execute(
                "UPDATE tasks SET status = 'pending', available_at = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![fmt_ts(available_at), reason, fmt_ts(now), task.id],
            )?;
            (changed, FailOutcome::Retrying { available_at })
        } else {
            let changed = conn.execute(
                "UPDATE tasks SET status = 'failed', result = ?1, last_error = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![reason, fmt_ts(now), task.id],
            )?;
            (changed, FailOutcome::Exhausted)
        };
        drop(conn);

        if changed == 0 {
            return Err(ForgeError::not_found("Task", task.id));
        }
        match outcome {
            FailOutcome::Retrying { available_at } => tracing::info!(
                "🔁 Task {} failed (attempt {}/{}), retry at {}: {}",
                task.id,
                task.attempts,
                task.max_attempts,
                available_at.to_rfc3339(),
                reason
            ),
            FailOutcome::Exhausted => tracing::warn!(
                "❌ Task {} failed permanently after {} attempt(s): {}",
                task.id,
                task.attempts,
                reason
            ),
        }
        Ok(outcome)
    }

    /// Return a `running` task to `pending` without charging it the interrupted attempt.
    /// Returns `false` when the task is not running (already finished or never claimed).
    pub fn release_task(&self, id: i64) -> Result<bool> {
        let now = fmt_ts(Utc::now());
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks
             SET status = 'pending', attempts = MAX(attempts - 1, 0), available_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'running'",
            params![now, id],
        )?;
        drop(conn);
        if changed > 0 {
            tracing::info!("↩️ Task {} returned to pending", id);
        }
        Ok(changed > 0)
    }

    /// Requeue `running` tasks nobody has touched for `grace` (left behind by a crash).
    pub fn recover_orphaned(&self, grace: Duration) -> Result<usize> {
        self.recover_orphaned_at(Utc::now(), grace)
    }

    pub fn recover_orphaned_at(&self, now: DateTime<Utc>, grace: Duration) -> Result<usize> {
        let Some(cutoff) = now.checked_sub_signed(grace) else {
            return Ok(0);
        };
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks
             SET status = 'pending', attempts = MAX(attempts - 1, 0), available_at = ?1, updated_at = ?1
             WHERE status = 'running' AND updated_at <= ?2",
            params![fmt_ts(now), fmt_ts(cutoff)],
        )?;
        drop(conn);
        if changed > 0 {
            tracing::warn!("🩹 Recovered {} orphaned running task(s)", changed);
        }
        Ok(changed)
    }

    /// Counters; `pending` only counts tasks claimable right now.
    pub fn stats(&self) -> Result<QueueStats> {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'pending' AND available_at <= ?1), 0),
                    COALESCE(SUM(status = 'pending' AND available_at > ?1), 0),
                    COALESCE(SUM(status = 'pending' AND available_at > ?1 AND attempts > 0), 0),
                    COALESCE(SUM(status = 'running'), 0),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'failed'), 0)
             FROM tasks",
            [fmt_ts(now)],
            |row| {
                Ok(QueueStats {
                    total: count_column(row, 0)?,
                    pending: count_column(row, 1)?,
                    delayed: count_column(row, 2)?,
                    retrying: count_column(row, 3)?,
                    running: count_column(row, 4)?,
                    completed: count_column(row, 5)?,
                    failed: count_column(row, 6)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Same as `stats().pending`, without the other counters.
    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = 'pending' AND available_at <= ?1",
            [fmt_ts(Utc::now())],
            |row| count_column(row, 0),
        )?;
        Ok(count)
    }

    // ─── Scheduled definitions ──────────────────────────────

    /// Register a deferred or recurring definition.
    pub fn add_scheduled_task(&self, new: NewSchedule) -> Result<i64> {
        if new.max_runs == Some(0) {
            return Err(ForgeError::invalid("max_runs must be >= 1"));
        }
        let timezone = new.timezone.unwrap_or_else(|| "UTC".to_string());
        cron::parse_timezone(&timezone)?;
        if let Some(expr) = &new.cron_expression {
            cron::validate_cron(expr)?;
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scheduled_tasks (description, scheduled_for, created_at, status,
                                          cron_expression, timezone, run_count, max_runs)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, ?6)",
            params![
                new.description,
                fmt_ts(new.scheduled_for),
                fmt_ts(Utc::now()),
                new.cron_expression,
                timezone,
                new.max_runs,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        match &new.cron_expression {
            Some(expr) => tracing::info!(
                "📅 Scheduled task {} '{}' ({} {}), first run {}",
                id,
                new.description,
                expr,
                timezone,
                new.scheduled_for.to_rfc3339()
            ),
            None => tracing::info!(
                "📅 Scheduled task {} for {}: {}",
                id,
                new.scheduled_for.to_rfc3339(),
                new.description
            ),
        }
        Ok(id)
    }

    /// Scheduled definitions ordered by id ascending.
    pub fn list_scheduled(&self, limit: Option<usize>) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM scheduled_tasks ORDER BY id LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([sql_limit(limit)], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_scheduled(&self, id: i64) -> Result<Option<ScheduledTask>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                [id],
                schedule_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Promote every due definition into one new pending task.
    pub fn release_due_scheduled(&self, limit: Option<usize>) -> Result<usize> {
        self.release_due_scheduled_at(Utc::now(), limit)
    }

    pub fn release_due_scheduled_at(&self, now: DateTime<Utc>, limit: Option<usize>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut stmt = tx.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM scheduled_tasks
             WHERE status = 'pending' AND scheduled_for <= ?1
             ORDER BY scheduled_for, id
             LIMIT ?2"
        ))?;
        let due = stmt
            .query_map(params![fmt_ts(now), sql_limit(limit)], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        if due.is_empty() {
            return Ok(0);
        }

        let stamp = fmt_ts(now);
        for schedule in &due {
            tx.execute(
                "INSERT INTO tasks (description, status, created_at, updated_at,
                                    attempts, max_attempts, available_at, priority)
                 VALUES (?1, 'pending', ?2, ?2, 0, ?3, ?2, 0)",
                params![schedule.description, stamp, DEFAULT_MAX_ATTEMPTS],
            )?;
            let run_count = schedule.run_count + 1;
            let (status, next_due) = advance_schedule(schedule, run_count);
            tx.execute(
                "UPDATE scheduled_tasks
                 SET status = ?1, scheduled_for = ?2, run_count = ?3, last_run = ?4
                 WHERE id = ?5",
                params![status.as_str(), fmt_ts(next_due), run_count, stamp, schedule.id],
            )?;
            tracing::debug!(
                "⏭️ Schedule {} emitted run {} -> {} (next {})",
                schedule.id,
                run_count,
                status,
                next_due.to_rfc3339()
            );
        }
        tx.commit()?;
        drop(conn);

        tracing::info!("🔔 Released {} scheduled task(s)", due.len());
        Ok(due.len())
    }
}

/// Next state of a definition that just emitted run number `run_count`.
fn advance_schedule(schedule: &ScheduledTask, run_count: u32) -> (ScheduleStatus, DateTime<Utc>) {
    let Some(expr) = &schedule.cron_expression else {
        return (ScheduleStatus::Released, schedule.scheduled_for);
    };
    if schedule.max_runs.is_some_and(|max| run_count >= max) {
        return (ScheduleStatus::Completed, schedule.scheduled_for);
    }
    match cron::next_run_from_cron(expr, &schedule.timezone, schedule.scheduled_for) {
        Ok(next) => (ScheduleStatus::Pending, next),
        Err(e) => {
            tracing::error!(
                "⚠️ Schedule {} cannot compute its next run, marking completed: {e}",
                schedule.id
            );
            (ScheduleStatus::Completed, schedule.scheduled_for)
        }
    }
}

// ─── Schema ──────────────────────────────────────────────

/// Create missing tables, then add missing columns and indexes. Idempotent.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TASKS_SQL)?;
    conn.execute_batch(CREATE_SCHEDULE_SQL)?;

    add_missing_columns(conn, "tasks", TASK_MIGRATIONS)?;
    add_missing_columns(conn, "scheduled_tasks", SCHEDULE_MIGRATIONS)?;

    // Rows written before delayed claims existed are available since creation
    conn.execute(
        "UPDATE tasks SET available_at = created_at WHERE available_at IS NULL",
        [],
    )?;
    conn.execute_batch(CREATE_INDEXES_SQL)?;
    Ok(())
}

fn add_missing_columns(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    for (name, decl) in columns {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, name],
            |row| row.get::<_, i64>(0),
        )? > 0;
        if !exists {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {name} {decl};"))?;
            tracing::info!("🛠️ Migrated {}: added column {}", table, name);
        }
    }
    Ok(())
}

// ─── Row mapping ─────────────────────────────────────────

/// Fixed-width UTC timestamp, so string order in SQL equals time order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts our own format, any RFC 3339 string, and naive ISO strings (taken as UTC).
pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(ForgeError::Database(msg)))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{raw}'")))
}

fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{s}'"))))
        .transpose()
}

fn count_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let n: i64 = row.get(idx)?;
    Ok(usize::try_from(n).unwrap_or(0))
}

fn sql_limit(limit: Option<usize>) -> i64 {
    // LIMIT -1 means "no limit" in SQLite
    limit.and_then(|n| i64::try_from(n).ok()).unwrap_or(-1)
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(2)?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(2, format!("unknown task status '{status_raw}'")))?;
    Ok(Task {
        id: row.get(0)?,
        description: row.get(1)?,
        status,
        created_at: ts_column(row, 3)?,
        updated_at: ts_column(row, 4)?,
        agent_model: row.get(5)?,
        result: row.get(6)?,
        last_error: row.get(7)?,
        attempts: row.get(8)?,
        max_attempts: row.get(9)?,
        available_at: ts_column(row, 10)?,
        idempotency_key: row.get(11)?,
        priority: row.get(12)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let status_raw: String = row.get(4)?;
    let status = ScheduleStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(4, format!("unknown schedule status '{status_raw}'")))?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        description: row.get(1)?,
        scheduled_for: ts_column(row, 2)?,
        created_at: ts_column(row, 3)?,
        status,
        cron_expression: row.get(5)?,
        timezone: row.get(6)?,
        run_count: row.get(7)?,
        max_runs: row.get(8)?,
        last_run: opt_ts_column(row, 9)?,
    })
}
