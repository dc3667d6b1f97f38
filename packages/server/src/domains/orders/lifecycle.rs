//! The order state machine and its client-facing operations.
//!
//! Creation reserves stock all-or-nothing, payment confirmation turns the
//! reservation into a permanent deduction, and cancellation hands the hold
//! back. Every transition goes through the store's conditional update, so a
//! racing sweep or operator cannot be overwritten; the later attempt fails
//! closed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use crate::common::{CoreError, CoreResult, CustomerId, GrainId, OrderId};
use crate::domains::inventory::StockLedger;
use crate::kernel::cache::{customer_orders_key, ReadThroughCache};
use crate::kernel::notifications::{Notification, NotificationHub, NotificationKind};
use crate::kernel::rate_limit::RateLimiter;
use crate::kernel::traits::{BasePaymentService, Caller};
use crate::kernel::with_deadline;

use super::models::{
    Actor, DeliveryAddress, LineItem, Order, OrderPriority, OrderStatus, OrderStatusEvent,
    PaymentStatus,
};
use super::store::{BaseOrderStore, TransitionOutcome};

/// Checkout input.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub line_items: Vec<LineItem>,
    pub delivery_address: DeliveryAddress,
    pub priority: OrderPriority,
}

pub struct OrderLifecycle {
    orders: Arc<dyn BaseOrderStore>,
    ledger: Arc<StockLedger>,
    payments: Arc<dyn BasePaymentService>,
    cache: Arc<ReadThroughCache>,
    notifications: Arc<NotificationHub>,
    rate_limiter: Arc<RateLimiter>,
    orders_cache_ttl: Duration,
    storage_deadline: Duration,
}

impl OrderLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn BaseOrderStore>,
        ledger: Arc<StockLedger>,
        payments: Arc<dyn BasePaymentService>,
        cache: Arc<ReadThroughCache>,
        notifications: Arc<NotificationHub>,
        rate_limiter: Arc<RateLimiter>,
        orders_cache_ttl: Duration,
        storage_deadline: Duration,
    ) -> Self {
        Self {
            orders,
            ledger,
            payments,
            cache,
            notifications,
            rate_limiter,
            orders_cache_ttl,
            storage_deadline,
        }
    }

    /// Checkout: reserve stock for every line item, then persist the order
    /// in `pending` with a payment reference for the gateway.
    ///
    /// Reservation is all-or-nothing across the order: the first failing
    /// item rolls back every reservation already taken for this request, in
    /// reverse order, and the whole creation fails.
    pub async fn create(&self, caller: &Caller, input: NewOrder) -> CoreResult<Order> {
        self.rate_limiter.check(&caller.identity).await?;

        if input.line_items.is_empty() {
            return Err(CoreError::Validation(
                "order must contain at least one line item".to_string(),
            ));
        }

        let mut reserved: Vec<(GrainId, f64)> = Vec::with_capacity(input.line_items.len());
        for item in &input.line_items {
            match self.ledger.reserve(&item.grain_id, item.quantity_kg).await {
                Ok(_) => reserved.push((item.grain_id.clone(), item.quantity_kg)),
                Err(err) => {
                    self.rollback_reservations(&reserved).await;
                    return Err(err);
                }
            }
        }

        let mut order = match Order::build(
            caller.customer_id,
            input.line_items,
            input.delivery_address,
            input.priority,
        ) {
            Ok(order) => order,
            Err(err) => {
                self.rollback_reservations(&reserved).await;
                return Err(err);
            }
        };

        match self
            .payments
            .create_payment(order.id, order.total_amount)
            .await
        {
            Ok(payment_ref) => order.payment_ref = Some(payment_ref),
            Err(e) => {
                self.rollback_reservations(&reserved).await;
                return Err(CoreError::Internal(anyhow!(
                    "payment registration failed: {e}"
                )));
            }
        }

        let event = OrderStatusEvent::new(
            order.id,
            OrderStatus::Pending,
            Actor::Customer,
            Some("order created".to_string()),
        );
        let order = match with_deadline(
            self.storage_deadline,
            self.orders.insert_order(order, event),
        )
        .await
        {
            Ok(order) => order,
            Err(err) => {
                self.rollback_reservations(&reserved).await;
                return Err(err);
            }
        };

        self.cache
            .invalidate(&customer_orders_key(order.customer_id))
            .await;

        tracing::info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            total = %order.total_amount,
            "order created"
        );
        Ok(order)
    }

    async fn rollback_reservations(&self, reserved: &[(GrainId, f64)]) {
        for (grain_id, quantity_kg) in reserved.iter().rev() {
            if let Err(e) = self.ledger.release(grain_id, *quantity_kg).await {
                tracing::error!(
                    grain_id = %grain_id,
                    quantity_kg,
                    error = %e,
                    "failed to roll back reservation"
                );
            }
        }
    }

    /// Settle the order after the payment collaborator reported success:
    /// `pending -> confirmed`, reservations consumed for good, caches
    /// invalidated and the customer notified. The refreshed `updated_at`
    /// starts the dwell clock for the first auto-progression step.
    pub async fn confirm_payment(&self, order_id: OrderId) -> CoreResult<Order> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("order {order_id}")))?;

        let payment_ref = order
            .payment_ref
            .clone()
            .ok_or(CoreError::PaymentUnverified(order_id))?;
        let verified = self
            .payments
            .verify_payment(&payment_ref)
            .await
            .map_err(CoreError::Internal)?;
        if !verified {
            return Err(CoreError::PaymentUnverified(order_id));
        }

        let mut order = match with_deadline(
            self.storage_deadline,
            self.orders.transition(
                order_id,
                &[OrderStatus::Pending],
                OrderStatus::Confirmed,
                Actor::Customer,
                Some("payment confirmed".to_string()),
            ),
        )
        .await?
        {
            TransitionOutcome::Applied(order) => order,
            TransitionOutcome::StaleState(current) => {
                return Err(CoreError::invalid_transition(current, OrderStatus::Confirmed));
            }
            TransitionOutcome::NotFound => {
                return Err(CoreError::not_found(format!("order {order_id}")));
            }
        };

        self.orders
            .mark_paid(order_id, Some(payment_ref.as_str()))
            .await?;
        order.payment_status = PaymentStatus::Paid;

        // The order is committed from here on: stock consumption drift is an
        // ops concern, not a reason to unwind a settled payment.
        for item in &order.line_items {
            if let Err(e) = self.ledger.consume(&item.grain_id, item.quantity_kg).await {
                tracing::error!(
                    order_id = %order.id,
                    grain_id = %item.grain_id,
                    error = %e,
                    "failed to consume reserved stock"
                );
            }
        }

        self.cache
            .invalidate(&customer_orders_key(order.customer_id))
            .await;
        self.notifications
            .send(
                order.customer_id,
                Notification::new(
                    NotificationKind::PaymentSuccess,
                    format!("Payment received for order {}", order.id),
                ),
            )
            .await;

        tracing::info!(order_id = %order.id, "payment confirmed");
        Ok(order)
    }

    /// Cancel an order that has not started processing, handing its
    /// reservation back. Rejected with `NotCancellable` from `grinding`
    /// onwards, including when a sweep wins the race to `grinding`.
    pub async fn cancel(&self, caller: &Caller, order_id: OrderId) -> CoreResult<Order> {
        self.rate_limiter.check(&caller.identity).await?;

        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("order {order_id}")))?;
        if order.customer_id != caller.customer_id && !caller.role.can_manage_orders() {
            return Err(CoreError::Unauthorized(
                "only the order's customer or an operator may cancel it".to_string(),
            ));
        }
        if !order.status.is_cancellable() {
            return Err(CoreError::not_cancellable(order.status));
        }

        let actor = if caller.role.can_manage_orders() {
            Actor::Operator
        } else {
            Actor::Customer
        };
        let order = match with_deadline(
            self.storage_deadline,
            self.orders.transition(
                order_id,
                &[OrderStatus::Pending, OrderStatus::Confirmed],
                OrderStatus::Cancelled,
                actor,
                Some("order cancelled".to_string()),
            ),
        )
        .await?
        {
            TransitionOutcome::Applied(order) => order,
            TransitionOutcome::StaleState(current) => {
                return Err(CoreError::not_cancellable(current));
            }
            TransitionOutcome::NotFound => {
                return Err(CoreError::not_found(format!("order {order_id}")));
            }
        };

        // Hand the holds back; clamped releases make this safe even when
        // payment had already consumed part of the reservation.
        for item in &order.line_items {
            if let Err(e) = self.ledger.release(&item.grain_id, item.quantity_kg).await {
                tracing::error!(
                    order_id = %order.id,
                    grain_id = %item.grain_id,
                    error = %e,
                    "failed to release stock on cancellation"
                );
            }
        }

        self.cache
            .invalidate(&customer_orders_key(order.customer_id))
            .await;
        self.notifications
            .send(
                order.customer_id,
                Notification::new(
                    NotificationKind::OrderCancelled,
                    format!("Order {} was cancelled", order.id),
                ),
            )
            .await;

        tracing::info!(order_id = %order.id, "order cancelled");
        Ok(order)
    }

    /// Manual operator transition. Same legality rules as the automatic
    /// path; only the roles the access-control collaborator vouches for get
    /// through.
    pub async fn update_status(
        &self,
        caller: &Caller,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> CoreResult<Order> {
        self.rate_limiter.check(&caller.identity).await?;
        if !caller.role.can_manage_orders() {
            return Err(CoreError::Unauthorized(
                "order status updates require an operator role".to_string(),
            ));
        }

        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("order {order_id}")))?;
        if !order.status.can_transition_to(new_status) {
            return Err(CoreError::invalid_transition(order.status, new_status));
        }

        let updated = match with_deadline(
            self.storage_deadline,
            self.orders
                .transition(order_id, &[order.status], new_status, Actor::Operator, None),
        )
        .await?
        {
            TransitionOutcome::Applied(order) => order,
            // Someone else moved the order between our read and the update;
            // fail closed rather than overwrite.
            TransitionOutcome::StaleState(current) => {
                return Err(CoreError::invalid_transition(current, new_status));
            }
            TransitionOutcome::NotFound => {
                return Err(CoreError::not_found(format!("order {order_id}")));
            }
        };

        self.cache
            .invalidate(&customer_orders_key(updated.customer_id))
            .await;
        self.notifications
            .send(
                updated.customer_id,
                Notification::new(
                    NotificationKind::OrderStatus,
                    format!("Order {} is now {}", updated.id, updated.status),
                ),
            )
            .await;

        Ok(updated)
    }

    pub async fn get_order(&self, order_id: OrderId) -> CoreResult<Order> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("order {order_id}")))
    }

    /// The order's append-only transition history.
    pub async fn order_history(&self, order_id: OrderId) -> CoreResult<Vec<OrderStatusEvent>> {
        self.orders.events_for_order(order_id).await
    }

    /// A customer's orders, newest first, served through the read-through
    /// cache.
    pub async fn orders_for_customer(&self, customer_id: CustomerId) -> CoreResult<Vec<Order>> {
        let key = customer_orders_key(customer_id);
        let value = self
            .cache
            .get_or_load(&key, self.orders_cache_ttl, || async move {
                let orders = self.orders.orders_for_customer(customer_id).await?;
                serde_json::to_value(orders)
                    .map_err(|e| CoreError::Internal(anyhow!("failed to serialize orders: {e}")))
            })
            .await?;
        serde_json::from_value(value)
            .map_err(|e| CoreError::Internal(anyhow!("malformed cached orders: {e}")))
    }
}
