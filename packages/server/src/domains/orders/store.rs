//! Storage contract for the order lifecycle.
//!
//! Transitions are conditional on the expected current state so that a sweep
//! racing a manual transition fails closed instead of overwriting. The
//! Postgres implementation pairs the conditional `UPDATE` with the history
//! append in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{CoreResult, CustomerId, GrainId, OrderId};

use super::models::order::OrderRow;
use super::models::{Actor, Order, OrderStatus, OrderStatusEvent};

/// Result of a conditional transition.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// The order matched an expected state and was moved.
    Applied(Order),
    /// The order exists but was in a different state than expected; nothing
    /// was changed.
    StaleState(OrderStatus),
    NotFound,
}

#[async_trait]
pub trait BaseOrderStore: Send + Sync {
    /// Persist a new order together with its initial history entry.
    async fn insert_order(&self, order: Order, event: OrderStatusEvent) -> CoreResult<Order>;

    async fn find_order(&self, id: OrderId) -> CoreResult<Option<Order>>;

    /// Orders of one customer, newest first.
    async fn orders_for_customer(&self, customer_id: CustomerId) -> CoreResult<Vec<Order>>;

    /// Move the order to `to` only if its current status is one of
    /// `expected`, appending the history entry in the same atomic step.
    async fn transition(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> CoreResult<TransitionOutcome>;

    async fn mark_paid(&self, id: OrderId, payment_ref: Option<&str>) -> CoreResult<()>;

    /// Orders in one of `statuses` whose `updated_at` is older than
    /// `stale_before`, oldest first, bounded by `limit`.
    async fn find_stalled(
        &self,
        statuses: &[OrderStatus],
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Order>>;

    async fn events_for_order(&self, id: OrderId) -> CoreResult<Vec<OrderStatusEvent>>;

    /// Paid demand for a grain since `since`, in kg.
    async fn paid_quantity_since(&self, grain_id: &GrainId, since: DateTime<Utc>)
        -> CoreResult<f64>;
}

/// Postgres-backed order store.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseOrderStore for PgOrderStore {
    async fn insert_order(&self, order: Order, event: OrderStatusEvent) -> CoreResult<Order> {
        let inserted = Order::insert(&order, &self.pool).await?;
        append_event(&event, &self.pool).await?;
        Ok(inserted)
    }

    async fn find_order(&self, id: OrderId) -> CoreResult<Option<Order>> {
        Order::find_by_id(id, &self.pool).await
    }

    async fn orders_for_customer(&self, customer_id: CustomerId) -> CoreResult<Vec<Order>> {
        Order::find_for_customer(customer_id, &self.pool).await
    }

    async fn transition(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> CoreResult<TransitionOutcome> {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders
                SET status = $2, updated_at = NOW()
              WHERE id = $1 AND status = ANY($3)
              RETURNING *",
        )
        .bind(id.as_uuid())
        .bind(to.to_string())
        .bind(&expected)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => {
                let order: Order = row.try_into()?;
                sqlx::query(
                    "INSERT INTO order_status_events (order_id, status, actor, note, at)
                     VALUES ($1, $2, $3, $4, NOW())",
                )
                .bind(id.as_uuid())
                .bind(to.to_string())
                .bind(actor.to_string())
                .bind(&note)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(TransitionOutcome::Applied(order))
            }
            None => {
                let current = sqlx::query_scalar::<_, String>(
                    "SELECT status FROM orders WHERE id = $1",
                )
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
                tx.rollback().await?;
                match current {
                    Some(status) => Ok(TransitionOutcome::StaleState(status.parse()?)),
                    None => Ok(TransitionOutcome::NotFound),
                }
            }
        }
    }

    async fn mark_paid(&self, id: OrderId, payment_ref: Option<&str>) -> CoreResult<()> {
        Order::mark_paid(id, payment_ref, &self.pool).await
    }

    async fn find_stalled(
        &self,
        statuses: &[OrderStatus],
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Order>> {
        Order::find_stalled(statuses, stale_before, limit, &self.pool).await
    }

    async fn events_for_order(&self, id: OrderId) -> CoreResult<Vec<OrderStatusEvent>> {
        OrderStatusEvent::list_for_order(id, &self.pool).await
    }

    async fn paid_quantity_since(
        &self,
        grain_id: &GrainId,
        since: DateTime<Utc>,
    ) -> CoreResult<f64> {
        Order::paid_quantity_since(grain_id, since, &self.pool).await
    }
}

async fn append_event(event: &OrderStatusEvent, pool: &PgPool) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO order_status_events (order_id, status, actor, note, at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(event.order_id.as_uuid())
    .bind(event.status.to_string())
    .bind(event.actor.to_string())
    .bind(&event.note)
    .bind(event.at)
    .execute(pool)
    .await?;
    Ok(())
}
