//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Two periodic tasks drive the system forward without any client request:
//! - The order progressor sweep, advancing paid orders through the
//!   processing states once they have dwelt long enough.
//! - The inventory scan, raising stock/quality/expiry/reorder alerts.
//!
//! The tasks only *wire timers to sweeps*; the sweeps themselves are plain
//! async functions (`run_progress_sweep`, `StockLedger::scan`) so tests and
//! shutdown paths can trigger exactly one deterministic pass. Shutting the
//! returned `JobScheduler` down stops all tasks.

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::orders::run_progress_sweep;

use super::deps::ServerDeps;

/// Start all scheduled tasks
pub async fn start_scheduler(deps: ServerDeps) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Order progressor - every progress_interval (default 60s)
    let sweep_deps = deps.clone();
    let sweep_job = Job::new_repeated_async(deps.config.progress_interval, move |_uuid, _lock| {
        let deps = sweep_deps.clone();
        Box::pin(async move {
            match run_progress_sweep(
                deps.order_store.as_ref(),
                &deps.cache,
                &deps.notifications,
                deps.config.progress_dwell,
            )
            .await
            {
                Ok(stats) if stats.scanned > 0 => {
                    tracing::info!(
                        advanced = stats.advanced,
                        skipped = stats.skipped,
                        failed = stats.failed,
                        "order progress sweep complete"
                    );
                }
                Ok(_) => {}
                // Log and retry on the next sweep rather than crash.
                Err(e) => tracing::error!("Order progress sweep failed: {}", e),
            }
        })
    })?;
    scheduler.add(sweep_job).await?;

    // Inventory scan - every inventory_scan_interval (default hourly)
    let scan_deps = deps.clone();
    let scan_job =
        Job::new_repeated_async(deps.config.inventory_scan_interval, move |_uuid, _lock| {
            let deps = scan_deps.clone();
            Box::pin(async move {
                if let Err(e) = deps.ledger.scan(deps.order_store.as_ref()).await {
                    tracing::error!("Inventory scan failed: {}", e);
                }
            })
        })?;
    scheduler.add(scan_job).await?;

    scheduler.start().await?;

    tracing::info!(
        "Scheduled tasks started (order progressor every {:?}, inventory scan every {:?})",
        deps.config.progress_interval,
        deps.config.inventory_scan_interval
    );
    Ok(scheduler)
}
