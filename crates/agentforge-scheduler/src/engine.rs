//! Schedule loop: promotes due scheduled definitions into the live queue.
//! Uses tokio timers, so it sleeps between polls and wakes early on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use agentforge_core::Result;

use crate::persistence::TaskStore;

/// Release due schedules every `poll_interval` until `shutdown` flips to `true`
/// (or its sender goes away). With `once`, run exactly one cycle.
///
/// Release errors are logged and retried on the next cycle, except in `once`
/// mode where they are returned. Returns the number of tasks released.
pub async fn run_schedule_loop(
    store: Arc<TaskStore>,
    poll_interval: Duration,
    once: bool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<usize> {
    tracing::info!("⏰ Scheduler started (poll every {:?})", poll_interval);
    let mut total = 0;

    loop {
        match store.release_due_scheduled(None) {
            Ok(0) => {}
            Ok(released) => {
                total += released;
                tracing::info!("🚀 Scheduler released {} task(s)", released);
            }
            Err(e) if once => return Err(e),
            Err(e) => tracing::error!("⚠️ Scheduler release failed, retrying next cycle: {e}"),
        }

        if once || *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("⏹️ Scheduler stopped ({} task(s) released)", total);
    Ok(total)
}
