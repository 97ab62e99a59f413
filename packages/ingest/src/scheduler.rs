//! Recurring sync cycles with graceful shutdown.
//!
//! Cycles run strictly one after another: the interval timer is armed
//! only after the previous cycle returns. A shutdown request never
//! interrupts a cycle in flight; it stops the next one from starting.

use std::time::Duration;

use ticket_map_ingest_models::RunKind;
use ticket_map_source_models::Dataset;
use tokio::sync::watch;

use crate::Pipeline;

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Datasets included in every cycle.
    pub datasets: Vec<Dataset>,
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Stop after the first cycle.
    pub once: bool,
}

/// Runs incremental cycles until `shutdown` flips to `true` (or after one
/// cycle when [`Schedule::once`] is set), then releases the pipeline and
/// its store. Returns the number of cycles run.
pub async fn run(
    pipeline: Pipeline,
    schedule: &Schedule,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut cycles = 0u64;

    loop {
        let report = pipeline
            .run_cycle(&schedule.datasets, RunKind::Incremental)
            .await;
        cycles += 1;

        if !report.is_clean() {
            log::warn!(
                "Cycle {cycles}: {} dataset(s) failed and will be retried next cycle",
                report.failed.len()
            );
        }

        if schedule.once {
            log::info!("Single cycle requested, stopping");
            break;
        }

        if *shutdown.borrow() {
            break;
        }

        log::info!("Next cycle in {}s", schedule.interval.as_secs());
        if sleep_or_shutdown(schedule.interval, &mut shutdown).await {
            break;
        }
    }

    drop(pipeline);
    log::info!("Scheduler stopped after {cycles} cycle(s), store connection released");

    cycles
}

/// Sleeps for `interval`. Returns `true` early if shutdown is requested.
async fn sleep_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    let mut sleep = std::pin::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow_and_update() => return true,
                Ok(()) => {}
                Err(_) => {
                    sleep.as_mut().await;
                    return false;
                }
            },
        }
    }
}

/// Completes on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
                return;
            }
            Err(e) => log::warn!("Failed to register SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

/// Spawns a task that flips the returned flag on SIGINT/SIGTERM.
#[must_use]
pub fn spawn_signal_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Shutdown requested, finishing the current cycle");
        if tx.send(true).is_err() {
            log::debug!("Scheduler already stopped");
        }
    });

    rx
}
