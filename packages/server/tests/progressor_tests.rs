//! Integration tests for the background progressor: dwell gating, one step
//! per sweep, system-tagged history, and fail-closed racing.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use server_core::common::CustomerId;
use server_core::domains::orders::models::{Actor, OrderStatus};
use server_core::domains::orders::store::TransitionOutcome;
use server_core::domains::orders::{run_progress_sweep, BaseOrderStore};
use server_core::kernel::test_dependencies::{customer_caller, operator_caller};
use server_core::kernel::{NotificationKind, TestDependencies};

use crate::common::{line_item, new_order, seed_batch, wheat};

async fn paid_order(ctx: &TestDependencies) -> server_core::domains::orders::models::Order {
    let caller = customer_caller(CustomerId::new());
    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();
    ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap()
}

fn dwelt() -> chrono::DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(10)
}

async fn sweep(ctx: &TestDependencies) -> server_core::domains::orders::SweepStats {
    run_progress_sweep(
        ctx.orders.as_ref(),
        &ctx.deps.cache,
        &ctx.deps.notifications,
        ctx.deps.config.progress_dwell,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn fresh_orders_are_left_alone_until_they_dwell() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let order = paid_order(&ctx).await;

    let stats = sweep(&ctx).await;
    assert_eq!(stats.scanned, 0);
    assert_eq!(stats.advanced, 0);

    let unchanged = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(unchanged.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn dwelt_confirmed_order_advances_one_step_per_sweep() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let order = paid_order(&ctx).await;

    ctx.orders.backdate(order.id, dwelt());
    let stats = sweep(&ctx).await;
    assert_eq!(stats.advanced, 1);
    assert_eq!(
        ctx.deps.lifecycle.get_order(order.id).await.unwrap().status,
        OrderStatus::Grinding
    );

    // The advance refreshed updated_at, so the next sweep must wait out the
    // dwell again.
    let stats = sweep(&ctx).await;
    assert_eq!(stats.scanned, 0);
    assert_eq!(
        ctx.deps.lifecycle.get_order(order.id).await.unwrap().status,
        OrderStatus::Grinding
    );
}

#[tokio::test]
async fn two_sweeps_take_a_grinding_order_to_out_for_delivery() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let order = paid_order(&ctx).await;
    let operator = operator_caller();
    ctx.deps
        .lifecycle
        .update_status(&operator, order.id, OrderStatus::Grinding)
        .await
        .unwrap();
    let history_before = ctx.deps.lifecycle.order_history(order.id).await.unwrap();

    ctx.orders.backdate(order.id, dwelt());
    sweep(&ctx).await;
    ctx.orders.backdate(order.id, dwelt());
    sweep(&ctx).await;

    let order = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::OutForDelivery);

    let history = ctx.deps.lifecycle.order_history(order.id).await.unwrap();
    let system_events: Vec<_> = history
        .iter()
        .filter(|e| e.actor == Actor::System)
        .collect();
    assert_eq!(system_events.len(), 2, "exactly one system event per sweep");
    assert_eq!(history.len(), history_before.len() + 2);
    assert_eq!(system_events[0].status, OrderStatus::Packing);
    assert_eq!(system_events[1].status, OrderStatus::OutForDelivery);
}

#[tokio::test]
async fn progressor_never_completes_delivery() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let order = paid_order(&ctx).await;
    let operator = operator_caller();
    for status in [
        OrderStatus::Grinding,
        OrderStatus::Packing,
        OrderStatus::OutForDelivery,
    ] {
        ctx.deps
            .lifecycle
            .update_status(&operator, order.id, status)
            .await
            .unwrap();
    }

    ctx.orders.backdate(order.id, dwelt());
    let stats = sweep(&ctx).await;
    assert_eq!(stats.advanced, 0);
    assert_eq!(
        ctx.deps.lifecycle.get_order(order.id).await.unwrap().status,
        OrderStatus::OutForDelivery
    );
}

#[tokio::test]
async fn sweep_notifies_and_invalidates_the_customer_view() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let order = paid_order(&ctx).await;
    let mut inbox = ctx.deps.notifications.register(order.customer_id).await;

    // Warm the cached view while the order is still confirmed.
    let view = ctx
        .deps
        .lifecycle
        .orders_for_customer(order.customer_id)
        .await
        .unwrap();
    assert_eq!(view[0].status, OrderStatus::Confirmed);

    ctx.orders.backdate(order.id, dwelt());
    sweep(&ctx).await;

    let notification = inbox.recv().await.unwrap();
    assert_eq!(notification.kind, NotificationKind::OrderStatus);
    assert!(notification.message.contains("grinding"));

    let view = ctx
        .deps
        .lifecycle
        .orders_for_customer(order.customer_id)
        .await
        .unwrap();
    assert_eq!(view[0].status, OrderStatus::Grinding);
}

#[tokio::test]
async fn stale_expected_state_fails_closed() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let order = paid_order(&ctx).await;

    // Someone advanced the order between a scan and the conditional update.
    let outcome = ctx
        .orders
        .transition(
            order.id,
            &[OrderStatus::Grinding],
            OrderStatus::Packing,
            Actor::System,
            None,
        )
        .await
        .unwrap();
    match outcome {
        TransitionOutcome::StaleState(current) => assert_eq!(current, OrderStatus::Confirmed),
        other => panic!("expected StaleState, got {other:?}"),
    }

    let unchanged = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(unchanged.status, OrderStatus::Confirmed);
    let history = ctx.deps.lifecycle.order_history(order.id).await.unwrap();
    assert!(history.iter().all(|e| e.actor != Actor::System));
}

#[tokio::test]
async fn one_failing_order_does_not_block_the_sweep() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let first = paid_order(&ctx).await;
    let second = paid_order(&ctx).await;

    ctx.orders.backdate(first.id, dwelt());
    ctx.orders.backdate(second.id, dwelt());

    // Move the first order out from under the sweep's scan snapshot.
    let operator = operator_caller();
    ctx.deps
        .lifecycle
        .update_status(&operator, first.id, OrderStatus::Grinding)
        .await
        .unwrap();
    ctx.orders.backdate(first.id, Utc::now());

    let stats = sweep(&ctx).await;
    // The freshly-touched first order is no longer scanned; the second one
    // still advances.
    assert_eq!(stats.advanced, 1);
    assert_eq!(
        ctx.deps.lifecycle.get_order(second.id).await.unwrap().status,
        OrderStatus::Grinding
    );
}
