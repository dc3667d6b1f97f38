//! Unattended advancement of paid orders through the processing states.
//!
//! A sweep advances each order in `confirmed`/`grinding`/`packing` that has
//! sat untouched past the dwell threshold by exactly one step, tagging the
//! history entry `actor=system`. Delivery completion is an explicit external
//! signal: `out_for_delivery` is never advanced from here.
//!
//! The sweep is a plain async function so tests (and shutdown paths) can run
//! exactly one deterministic pass; the timer wiring lives in
//! `kernel::scheduled_tasks`.

use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;

use crate::common::{CoreError, CoreResult};
use crate::kernel::cache::{customer_orders_key, ReadThroughCache};
use crate::kernel::notifications::{Notification, NotificationHub, NotificationKind};

use super::models::{Actor, OrderStatus};
use super::store::{BaseOrderStore, TransitionOutcome};

/// Upper bound on orders considered per sweep; anything beyond waits for the
/// next pass.
pub const SWEEP_LIMIT: i64 = 500;

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub advanced: usize,
    /// Orders that moved concurrently between the scan and the conditional
    /// update; they will be looked at again next sweep.
    pub skipped: usize,
    pub failed: usize,
}

/// Run one progressor pass. One failing order never blocks the rest of the
/// sweep; its error is logged and counted.
pub async fn run_progress_sweep(
    orders: &dyn BaseOrderStore,
    cache: &ReadThroughCache,
    notifications: &NotificationHub,
    dwell: Duration,
) -> CoreResult<SweepStats> {
    let dwell = chrono::Duration::from_std(dwell)
        .map_err(|e| CoreError::Internal(anyhow!("dwell threshold out of range: {e}")))?;
    let stale_before = Utc::now() - dwell;

    let stalled = orders
        .find_stalled(
            &[
                OrderStatus::Confirmed,
                OrderStatus::Grinding,
                OrderStatus::Packing,
            ],
            stale_before,
            SWEEP_LIMIT,
        )
        .await?;

    let mut stats = SweepStats {
        scanned: stalled.len(),
        ..Default::default()
    };
    if stalled.len() as i64 == SWEEP_LIMIT {
        tracing::warn!(limit = SWEEP_LIMIT, "sweep hit its batch limit, remainder deferred");
    }

    for order in stalled {
        let Some(next) = order.status.next_processing_step() else {
            stats.skipped += 1;
            continue;
        };
        match orders
            .transition(
                order.id,
                &[order.status],
                next,
                Actor::System,
                Some("auto-progressed".to_string()),
            )
            .await
        {
            Ok(TransitionOutcome::Applied(updated)) => {
                stats.advanced += 1;
                cache
                    .invalidate(&customer_orders_key(updated.customer_id))
                    .await;
                notifications
                    .send(
                        updated.customer_id,
                        Notification::new(
                            NotificationKind::OrderStatus,
                            format!("Order {} is now {}", updated.id, updated.status),
                        ),
                    )
                    .await;
                tracing::debug!(order_id = %updated.id, status = %updated.status, "order auto-progressed");
            }
            Ok(TransitionOutcome::StaleState(current)) => {
                // A manual transition won the race; fail closed and move on.
                stats.skipped += 1;
                tracing::debug!(order_id = %order.id, status = %current, "order moved concurrently, skipping");
            }
            Ok(TransitionOutcome::NotFound) => {
                stats.skipped += 1;
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!(order_id = %order.id, error = %e, "failed to advance order");
            }
        }
    }

    Ok(stats)
}
