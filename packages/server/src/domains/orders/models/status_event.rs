use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{CoreError, CoreResult, OrderId};

use super::order::OrderStatus;

/// Who drove a transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Customer,
    Operator,
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Customer => write!(f, "customer"),
            Actor::Operator => write!(f, "operator"),
            Actor::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Actor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "customer" => Ok(Actor::Customer),
            "operator" => Ok(Actor::Operator),
            "system" => Ok(Actor::System),
            _ => Err(anyhow!("Invalid actor: {}", s)),
        }
    }
}

/// One row of the append-only order history. Never mutated or deleted;
/// this is the authoritative audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub actor: Actor,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl OrderStatusEvent {
    pub fn new(
        order_id: OrderId,
        status: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Self {
        Self {
            order_id,
            status,
            actor,
            note,
            at: Utc::now(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderStatusEventRow {
    order_id: Uuid,
    status: String,
    actor: String,
    note: Option<String>,
    at: DateTime<Utc>,
}

impl TryFrom<OrderStatusEventRow> for OrderStatusEvent {
    type Error = CoreError;

    fn try_from(row: OrderStatusEventRow) -> CoreResult<Self> {
        Ok(Self {
            order_id: OrderId::from_uuid(row.order_id),
            status: row.status.parse()?,
            actor: row.actor.parse()?,
            note: row.note,
            at: row.at,
        })
    }
}

impl OrderStatusEvent {
    pub async fn list_for_order(order_id: OrderId, pool: &PgPool) -> CoreResult<Vec<OrderStatusEvent>> {
        let rows = sqlx::query_as::<_, OrderStatusEventRow>(
            "SELECT * FROM order_status_events WHERE order_id = $1 ORDER BY at",
        )
        .bind(order_id.as_uuid())
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(OrderStatusEvent::try_from).collect()
    }
}
