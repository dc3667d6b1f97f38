//! Integration tests for the order lifecycle: all-or-nothing checkout,
//! payment settlement, cancellation, manual transitions, and admission.

mod common;

use rust_decimal::Decimal;
use server_core::common::{CoreError, CustomerId};
use server_core::domains::inventory::BaseInventoryStore;
use server_core::domains::orders::models::{Actor, OrderStatus, PaymentStatus};
use server_core::domains::orders::BaseOrderStore;
use server_core::kernel::test_dependencies::{customer_caller, operator_caller, test_config};
use server_core::kernel::{NotificationKind, TestDependencies};

use crate::common::{line_item, millet, new_order, seed_batch, wheat};

#[tokio::test]
async fn create_reserves_stock_and_persists_pending_order() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 4.0)]))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.payment_ref.is_some(), "gateway reference must be attached");
    // 45 * 4 + medium grind surcharge of 8
    assert_eq!(order.total_amount, Decimal::from(188));

    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 6.0);
    assert_eq!(ctx.payments.created().len(), 1);

    let history = ctx.deps.lifecycle.order_history(order.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OrderStatus::Pending);
    assert_eq!(history[0].actor, Actor::Customer);
}

#[tokio::test]
async fn create_fails_when_one_item_cannot_be_covered() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 5.0).await;
    seed_batch(&ctx, &millet(), 1.0).await;
    let caller = customer_caller(CustomerId::new());

    let err = ctx
        .deps
        .lifecycle
        .create(
            &caller,
            new_order(vec![line_item(&wheat(), 2.0), line_item(&millet(), 3.0)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientStock { .. }));

    // All-or-nothing: the wheat reservation was rolled back.
    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 5.0);
    assert_eq!(ctx.inventory.available_stock(&millet()).await.unwrap(), 1.0);
    assert!(ctx
        .orders
        .orders_for_customer(caller.customer_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn single_item_over_availability_leaves_batch_untouched() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 2.0).await;
    let caller = customer_caller(CustomerId::new());

    let err = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 3.0)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientStock { .. }));
    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 2.0);
}

#[tokio::test]
async fn confirm_payment_consumes_stock_and_notifies() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 5.0).await;
    let caller = customer_caller(CustomerId::new());
    let mut inbox = ctx.deps.notifications.register(caller.customer_id).await;

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 2.0)]))
        .await
        .unwrap();

    let confirmed = ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);

    // current_stock dropped by 2, availability unchanged by the confirm.
    assert_eq!(ctx.inventory.total_stock(&wheat()).await.unwrap(), 3.0);
    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 3.0);

    let notification = inbox.recv().await.unwrap();
    assert_eq!(notification.kind, NotificationKind::PaymentSuccess);

    let history = ctx.deps.lifecycle.order_history(order.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn confirm_payment_rejects_unverified_payment() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 5.0).await;
    let caller = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 2.0)]))
        .await
        .unwrap();

    ctx.payments.refuse_verification();
    let err = ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap_err();
    assert!(matches!(err, CoreError::PaymentUnverified(_)));

    let unchanged = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(unchanged.status, OrderStatus::Pending);
    assert_eq!(ctx.inventory.total_stock(&wheat()).await.unwrap(), 5.0);
}

#[tokio::test]
async fn confirm_payment_twice_fails_closed() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 5.0).await;
    let caller = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 2.0)]))
        .await
        .unwrap();
    ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap();

    let err = ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    // The double confirm must not consume twice.
    assert_eq!(ctx.inventory.total_stock(&wheat()).await.unwrap(), 3.0);
}

#[tokio::test]
async fn cancel_pending_order_returns_reservation() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 4.0)]))
        .await
        .unwrap();
    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 6.0);

    let cancelled = ctx.deps.lifecycle.cancel(&caller, order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 10.0);
}

#[tokio::test]
async fn cancel_after_processing_started_is_rejected() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());
    let operator = operator_caller();

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 4.0)]))
        .await
        .unwrap();
    ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap();
    ctx.deps
        .lifecycle
        .update_status(&operator, order.id, OrderStatus::Grinding)
        .await
        .unwrap();

    let err = ctx.deps.lifecycle.cancel(&caller, order.id).await.unwrap_err();
    assert!(matches!(err, CoreError::NotCancellable(_)));
    let order = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Grinding);
}

#[tokio::test]
async fn cancel_requires_owner_or_operator() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let owner = customer_caller(CustomerId::new());
    let stranger = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&owner, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();

    let err = ctx.deps.lifecycle.cancel(&stranger, order.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));

    ctx.deps
        .lifecycle
        .cancel(&operator_caller(), order.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn illegal_transition_leaves_order_untouched() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());
    let operator = operator_caller();

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();
    let before = ctx.deps.lifecycle.get_order(order.id).await.unwrap();

    // pending -> packing is not an edge.
    let err = ctx
        .deps
        .lifecycle
        .update_status(&operator, order.id, OrderStatus::Packing)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    let after = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.updated_at, before.updated_at);
    let history = ctx.deps.lifecycle.order_history(order.id).await.unwrap();
    assert_eq!(history.len(), 1, "no event for a rejected transition");
}

#[tokio::test]
async fn update_status_requires_operator_role() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();

    let err = ctx
        .deps
        .lifecycle
        .update_status(&caller, order.id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
}

#[tokio::test]
async fn delivery_completion_is_an_explicit_operator_signal() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());
    let operator = operator_caller();

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();
    ctx.deps.lifecycle.confirm_payment(order.id).await.unwrap();
    for status in [
        OrderStatus::Grinding,
        OrderStatus::Packing,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        ctx.deps
            .lifecycle
            .update_status(&operator, order.id, status)
            .await
            .unwrap();
    }

    let delivered = ctx.deps.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    // Terminal: nothing may move a delivered order.
    let err = ctx
        .deps
        .lifecycle
        .update_status(&operator, order.id, OrderStatus::Grinding)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn customer_order_view_reflects_mutations_before_ttl_expiry() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let caller = customer_caller(CustomerId::new());

    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();

    // Warm the cache (TTL is 300s, far beyond this test's lifetime).
    let view = ctx
        .deps
        .lifecycle
        .orders_for_customer(caller.customer_id)
        .await
        .unwrap();
    assert_eq!(view[0].status, OrderStatus::Pending);

    ctx.deps.lifecycle.cancel(&caller, order.id).await.unwrap();

    // Eager invalidation must beat the TTL.
    let view = ctx
        .deps
        .lifecycle
        .orders_for_customer(caller.customer_id)
        .await
        .unwrap();
    assert_eq!(view[0].status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn admission_gate_rejects_before_any_side_effect() {
    let mut config = test_config();
    config.rate_limit_requests = 2;
    let ctx = TestDependencies::with_config(config);
    seed_batch(&ctx, &wheat(), 100.0).await;
    let caller = customer_caller(CustomerId::new());

    for _ in 0..2 {
        ctx.deps
            .lifecycle
            .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
            .await
            .unwrap();
    }

    let err = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RateLimited { .. }));

    // The rejected request must not have touched stock.
    assert_eq!(ctx.inventory.available_stock(&wheat()).await.unwrap(), 98.0);
}

#[tokio::test]
async fn resolved_caller_can_check_out() {
    let ctx = TestDependencies::new();
    seed_batch(&ctx, &wheat(), 10.0).await;
    let customer_id = CustomerId::new();
    ctx.access_control
        .grant("session-9f2", customer_caller(customer_id));

    let caller = ctx.deps.resolve_caller("session-9f2").await.unwrap();
    let order = ctx
        .deps
        .lifecycle
        .create(&caller, new_order(vec![line_item(&wheat(), 1.0)]))
        .await
        .unwrap();
    assert_eq!(order.customer_id, customer_id);

    assert!(matches!(
        ctx.deps.resolve_caller("stranger").await,
        Err(CoreError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn admission_window_admits_one_hundred_then_rejects() {
    let ctx = TestDependencies::new();

    for _ in 0..100 {
        ctx.deps.rate_limiter.check("203.0.113.9").await.unwrap();
    }
    let err = ctx.deps.rate_limiter.check("203.0.113.9").await.unwrap_err();
    match err {
        CoreError::RateLimited { retry_after } => {
            assert!(retry_after <= std::time::Duration::from_secs(60));
        }
        other => panic!("expected RateLimited, got {other}"),
    }

    // Other identities are unaffected.
    ctx.deps.rate_limiter.check("203.0.113.10").await.unwrap();
}
