//! # AgentForge CLI
//!
//! Thin command-line front end over the task queue, scheduler and dispatcher.
//!
//! Usage:
//!   agentforge queue add "Summarize inbox" --priority 5
//!   agentforge queue run --concurrency 20        # drain with autoscaling
//!   agentforge schedule add "Backup" --cron "0 3 * * *" --tz Europe/Berlin
//!   agentforge schedule run                      # promote due schedules
//!   agentforge loadtest --agents 100 --tasks 200

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use agentforge_core::{AgentForgeConfig, ForgePaths};
use agentforge_scheduler::{
    Dispatcher, DispatcherOptions, LoadTestOptions, NewTask, SimulatedProcessor, TaskStore,
    duration_from_secs, parse_schedule_spec, run_load_test, run_schedule_loop,
};

/// Simulated agent latency for `queue run` and `loadtest`.
const SIMULATED_LATENCY: Duration = Duration::from_millis(700);

#[derive(Parser)]
#[command(
    name = "agentforge",
    version,
    about = "🛠️ AgentForge — durable task queue, scheduler and autoscaling agents"
)]
struct Cli {
    /// AgentForge home directory (default: $AGENTFORGE_HOME or ~/.agentforge)
    #[arg(long, global = true)]
    home: Option<String>,

    /// Config file (default: <home>/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Live task queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// Deferred and recurring tasks
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },
    /// Flood the queue and drain it with simulated agents
    Loadtest {
        #[arg(long, default_value_t = 100)]
        agents: usize,
        #[arg(long, default_value_t = 200)]
        tasks: usize,
        /// Report path (default: <home>/reports/loadtest.json)
        #[arg(long)]
        report: Option<String>,
        /// Delete the task database first
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Enqueue a task
    Add {
        description: String,
        /// Model hint for the agent
        #[arg(long)]
        model: Option<String>,
        /// Idempotency key; re-adding the same key is a no-op
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        /// Seconds before the task becomes claimable
        #[arg(long)]
        delay: Option<u64>,
    },
    /// List tasks
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show queue counters
    Stats,
    /// Requeue running tasks abandoned by a crashed run
    Recover {
        /// Only tasks untouched for this many seconds
        #[arg(long)]
        grace: Option<u64>,
    },
    /// Drain the queue with a pool of agents
    Run {
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        no_autoscale: bool,
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Schedule a task (one-shot with --at, recurring with --cron)
    Add {
        description: String,
        /// ISO-8601 time, "in:30m", or "cron:<expr>"
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        cron: Option<String>,
        /// IANA timezone (default from config)
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        max_runs: Option<u32>,
    },
    /// List scheduled tasks
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Move due scheduled tasks into the queue
    Run {
        /// Poll interval in seconds (default from config)
        #[arg(long)]
        poll: Option<u64>,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn open_store(paths: &ForgePaths) -> Result<Arc<TaskStore>> {
    Ok(Arc::new(TaskStore::open(&paths.task_db)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "agentforge=debug,agentforge_scheduler=debug,agentforge_core=debug"
    } else {
        "agentforge=info,agentforge_scheduler=info,agentforge_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let home = cli.home.as_deref().map(expand_path);
    let paths = ForgePaths::resolve(home.as_deref());
    paths.ensure_dirs()?;
    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(|| paths.config_file.clone());
    let config = AgentForgeConfig::load_from(&config_path)?;

    match cli.command {
        Command::Queue { action } => queue_command(action, &paths, &config).await,
        Command::Schedule { action } => schedule_command(action, &paths, &config).await,
        Command::Loadtest { agents, tasks, report, reset } => {
            let report_path = report
                .as_deref()
                .map(expand_path)
                .unwrap_or_else(|| paths.reports_dir.join("loadtest.json"));
            let mut options = LoadTestOptions::new(&report_path);
            options.agents = agents;
            options.tasks = tasks;
            options.reset = reset;
            options.latency = SIMULATED_LATENCY;

            let report = run_load_test(&paths.task_db, options, &config.runtime, &config.agent_model).await?;
            println!("📊 Load test finished in {:.2}s", report.duration_seconds);
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("   Report: {}", report_path.display());
            Ok(())
        }
    }
}

async fn queue_command(action: QueueCommand, paths: &ForgePaths, config: &AgentForgeConfig) -> Result<()> {
    let store = open_store(paths)?;
    match action {
        QueueCommand::Add { description, model, key, max_attempts, priority, delay } => {
            let mut new = NewTask::new(description)
                .max_attempts(max_attempts.unwrap_or(config.queue.default_max_attempts))
                .priority(priority);
            if let Some(model) = model {
                new = new.agent_model(model);
            }
            if let Some(key) = key {
                new = new.idempotency_key(key);
            }
            if let Some(secs) = delay {
                let available_at = chrono::Utc::now()
                    .checked_add_signed(duration_from_secs(secs)?)
                    .ok_or_else(|| anyhow::anyhow!("--delay {secs} is too far in the future"))?;
                new = new.available_at(available_at);
            }
            let id = store.add_task(new)?;
            println!("✅ Task {id} queued");
        }
        QueueCommand::List { limit } => {
            let tasks = store.list_tasks(limit)?;
            if tasks.is_empty() {
                println!("📭 Queue is empty");
            }
            for task in tasks {
                println!(
                    "#{:<5} {:<9} p{:<3} {}/{}  {}",
                    task.id, task.status, task.priority, task.attempts, task.max_attempts, task.description
                );
                if let Some(err) = &task.last_error {
                    println!("       last error: {err}");
                }
            }
        }
        QueueCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        QueueCommand::Recover { grace } => {
            let grace = grace.unwrap_or(config.runtime.orphan_grace_secs);
            let recovered = store.recover_orphaned(duration_from_secs(grace)?)?;
            println!("🩹 Requeued {recovered} orphaned task(s)");
        }
        QueueCommand::Run { concurrency, no_autoscale, model } => {
            let agent_model = model.unwrap_or_else(|| config.agent_model.clone());
            let options = DispatcherOptions::from_runtime(&config.runtime, concurrency)
                .autoscale_enabled(config.runtime.autoscale.enabled && !no_autoscale);
            let dispatcher = Dispatcher::new(
                store,
                Arc::new(SimulatedProcessor::new(SIMULATED_LATENCY)),
                agent_model,
                options,
            );

            // Ctrl-C stops the pool and returns in-flight tasks to pending
            let handle = dispatcher.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("🛑 Interrupted, aborting dispatcher");
                    handle.abort();
                }
            });

            let summary = dispatcher.run().await?;
            println!("🏁 Queue drained in {:.2}s", summary.duration_seconds);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn schedule_command(action: ScheduleCommand, paths: &ForgePaths, config: &AgentForgeConfig) -> Result<()> {
    let store = open_store(paths)?;
    match action {
        ScheduleCommand::Add { description, at, cron, tz, max_runs } => {
            let timezone = tz.unwrap_or_else(|| config.scheduler.default_timezone.clone());
            let spec = parse_schedule_spec(at.as_deref(), cron.as_deref(), &timezone, max_runs)?;
            let run_at = spec.run_at;
            let id = store.add_scheduled_task(spec.into_new_schedule(description))?;
            println!("📅 Scheduled task {id}, first run {}", run_at.to_rfc3339());
        }
        ScheduleCommand::List { limit } => {
            let schedules = store.list_scheduled(limit)?;
            if schedules.is_empty() {
                println!("📭 No scheduled tasks");
            }
            let now = chrono::Utc::now();
            for s in schedules {
                let rule = if s.is_recurring() {
                    s.cron_expression.as_deref().unwrap_or_default()
                } else {
                    "once"
                };
                let due = if s.is_due(now) { " ⏰" } else { "" };
                let runs = match s.max_runs {
                    Some(max) => format!("{}/{}", s.run_count, max),
                    None => s.run_count.to_string(),
                };
                println!(
                    "#{:<5} {:<9}{} {}  [{} {}] runs {}  {}",
                    s.id,
                    s.status,
                    due,
                    s.scheduled_for.to_rfc3339(),
                    rule,
                    s.timezone,
                    runs,
                    s.description
                );
            }
        }
        ScheduleCommand::Run { poll, once } => {
            let interval = Duration::from_secs(poll.unwrap_or(config.scheduler.poll_interval_secs).max(1));
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("⏹️ Scheduler stopped by user");
                    tx.send_replace(true);
                } else {
                    // no signal handler: keep the loop alive until the process exits
                    std::future::pending::<()>().await;
                }
            });
            let released = run_schedule_loop(store, interval, once, rx).await?;
            println!("🔔 Released {released} task(s)");
        }
    }
    Ok(())
}
