use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{CoreError, CoreResult, CustomerId, GrainId, OrderId};

/// Order lifecycle state.
///
/// Legal edges: `pending -> confirmed -> grinding -> packing ->
/// out_for_delivery -> delivered`, plus `cancelled` from `pending` or
/// `confirmed` only. `delivered` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Grinding,
    Packing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Grinding)
                | (Grinding, Packing)
                | (Packing, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    /// The single step the background progressor may take from this state.
    /// Delivery completion is an explicit external signal, never time-based,
    /// so `out_for_delivery` has no automatic successor.
    pub fn next_processing_step(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Confirmed => Some(OrderStatus::Grinding),
            OrderStatus::Grinding => Some(OrderStatus::Packing),
            OrderStatus::Packing => Some(OrderStatus::OutForDelivery),
            _ => None,
        }
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Confirmed => write!(f, "confirmed"),
            OrderStatus::Grinding => write!(f, "grinding"),
            OrderStatus::Packing => write!(f, "packing"),
            OrderStatus::OutForDelivery => write!(f, "out_for_delivery"),
            OrderStatus::Delivered => write!(f, "delivered"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "grinding" => Ok(OrderStatus::Grinding),
            "packing" => Ok(OrderStatus::Packing),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(anyhow!("Invalid order status: {}", s)),
        }
    }
}

/// Payment status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(anyhow!("Invalid payment status: {}", s)),
        }
    }
}

/// Priority enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Standard,
    Express,
    Urgent,
}

impl Default for OrderPriority {
    fn default() -> Self {
        OrderPriority::Standard
    }
}

impl std::fmt::Display for OrderPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderPriority::Standard => write!(f, "standard"),
            OrderPriority::Express => write!(f, "express"),
            OrderPriority::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for OrderPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(OrderPriority::Standard),
            "express" => Ok(OrderPriority::Express),
            "urgent" => Ok(OrderPriority::Urgent),
            _ => Err(anyhow!("Invalid order priority: {}", s)),
        }
    }
}

/// How the grain is ground before packing. Finer grinds carry a surcharge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrindOption {
    Whole,
    Coarse,
    Medium,
    Fine,
    Powder,
}

impl GrindOption {
    pub fn surcharge(self) -> Decimal {
        match self {
            GrindOption::Whole => Decimal::ZERO,
            GrindOption::Coarse => Decimal::from(5),
            GrindOption::Medium => Decimal::from(8),
            GrindOption::Fine => Decimal::from(12),
            GrindOption::Powder => Decimal::from(15),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            GrindOption::Whole => "Whole grains (no grinding)",
            GrindOption::Coarse => "Coarse grind - chunky texture",
            GrindOption::Medium => "Medium grind - balanced texture",
            GrindOption::Fine => "Fine grind - smooth texture",
            GrindOption::Powder => "Powder grind - very fine flour",
        }
    }
}

/// One grain position on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub grain_id: GrainId,
    pub grain_name: String,
    pub quantity_kg: f64,
    pub price_per_kg: Decimal,
    pub grind: GrindOption,
}

impl LineItem {
    /// Price of this position: grain price times quantity plus the grind
    /// surcharge.
    pub fn line_total(&self) -> CoreResult<Decimal> {
        let quantity = Decimal::try_from(self.quantity_kg)
            .map_err(|e| anyhow!("invalid quantity {}: {e}", self.quantity_kg))?;
        Ok(self.price_per_kg * quantity + self.grind.surcharge())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub recipient: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
}

/// A customer order.
///
/// Once `delivered` or `cancelled` the record is immutable; history lives in
/// `order_status_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItem>,
    pub delivery_address: DeliveryAddress,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_ref: Option<String>,
    pub assigned_processing_site: Option<String>,
    pub assigned_courier: Option<String>,
    pub total_amount: Decimal,
    pub priority: OrderPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a pending order; totals are derived from the line items.
    pub fn build(
        customer_id: CustomerId,
        line_items: Vec<LineItem>,
        delivery_address: DeliveryAddress,
        priority: OrderPriority,
    ) -> CoreResult<Self> {
        let mut total_amount = Decimal::ZERO;
        for item in &line_items {
            total_amount += item.line_total()?;
        }
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            customer_id,
            line_items,
            delivery_address,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_ref: None,
            assigned_processing_site: None,
            assigned_courier: None,
            total_amount,
            priority,
            created_at: now,
            updated_at: now,
        })
    }
}

// =============================================================================
// Postgres access
// =============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct OrderRow {
    id: Uuid,
    customer_id: Uuid,
    line_items: serde_json::Value,
    delivery_address: serde_json::Value,
    status: String,
    payment_status: String,
    payment_ref: Option<String>,
    assigned_processing_site: Option<String>,
    assigned_courier: Option<String>,
    total_amount: Decimal,
    priority: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = CoreError;

    fn try_from(row: OrderRow) -> CoreResult<Self> {
        let line_items: Vec<LineItem> = serde_json::from_value(row.line_items)
            .map_err(|e| anyhow!("malformed line items for order {}: {e}", row.id))?;
        let delivery_address: DeliveryAddress = serde_json::from_value(row.delivery_address)
            .map_err(|e| anyhow!("malformed delivery address for order {}: {e}", row.id))?;
        Ok(Self {
            id: OrderId::from_uuid(row.id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            line_items,
            delivery_address,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            payment_ref: row.payment_ref,
            assigned_processing_site: row.assigned_processing_site,
            assigned_courier: row.assigned_courier,
            total_amount: row.total_amount,
            priority: row.priority.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Order {
    pub async fn insert(order: &Order, pool: &PgPool) -> CoreResult<Order> {
        let line_items = serde_json::to_value(&order.line_items)
            .map_err(|e| anyhow!("failed to serialize line items: {e}"))?;
        let delivery_address = serde_json::to_value(&order.delivery_address)
            .map_err(|e| anyhow!("failed to serialize delivery address: {e}"))?;
        let row = sqlx::query_as::<_, OrderRow>(
            "INSERT INTO orders (
                 id, customer_id, line_items, delivery_address, status,
                 payment_status, payment_ref, assigned_processing_site,
                 assigned_courier, total_amount, priority, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING *",
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(line_items)
        .bind(delivery_address)
        .bind(order.status.to_string())
        .bind(order.payment_status.to_string())
        .bind(&order.payment_ref)
        .bind(&order.assigned_processing_site)
        .bind(&order.assigned_courier)
        .bind(order.total_amount)
        .bind(order.priority.to_string())
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(pool)
        .await?;

        row.try_into()
    }

    pub async fn find_by_id(id: OrderId, pool: &PgPool) -> CoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    pub async fn find_for_customer(
        customer_id: CustomerId,
        pool: &PgPool,
    ) -> CoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE customer_id = $1 ORDER BY created_at DESC",
        )
        .bind(customer_id.as_uuid())
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    /// Orders in one of `statuses` untouched since `stale_before`, oldest
    /// first.
    pub async fn find_stalled(
        statuses: &[OrderStatus],
        stale_before: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> CoreResult<Vec<Order>> {
        let statuses: Vec<String> = statuses.iter().map(ToString::to_string).collect();
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders
              WHERE status = ANY($1) AND updated_at < $2
              ORDER BY updated_at
              LIMIT $3",
        )
        .bind(&statuses)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    pub async fn mark_paid(id: OrderId, payment_ref: Option<&str>, pool: &PgPool) -> CoreResult<()> {
        sqlx::query(
            "UPDATE orders SET payment_status = 'paid', payment_ref = COALESCE($2, payment_ref)
              WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(payment_ref)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Paid demand for a grain since `since`, in kg. Feeds the reorder
    /// projection in the inventory scan.
    pub async fn paid_quantity_since(
        grain_id: &GrainId,
        since: DateTime<Utc>,
        pool: &PgPool,
    ) -> CoreResult<f64> {
        let total = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(SUM((item->>'quantity_kg')::double precision), 0)
               FROM orders, jsonb_array_elements(line_items) AS item
              WHERE item->>'grain_id' = $1
                AND payment_status = 'paid'
                AND created_at >= $2",
        )
        .bind(grain_id.as_str())
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges_only() {
        use OrderStatus::*;
        let all = [
            Pending,
            Confirmed,
            Grinding,
            Packing,
            OutForDelivery,
            Delivered,
            Cancelled,
        ];
        let legal = [
            (Pending, Confirmed),
            (Confirmed, Grinding),
            (Grinding, Packing),
            (Packing, OutForDelivery),
            (OutForDelivery, Delivered),
            (Pending, Cancelled),
            (Confirmed, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn progressor_never_delivers() {
        assert_eq!(
            OrderStatus::Packing.next_processing_step(),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(OrderStatus::OutForDelivery.next_processing_step(), None);
        assert_eq!(OrderStatus::Pending.next_processing_step(), None);
    }

    #[test]
    fn order_total_includes_grind_surcharge() {
        let items = vec![
            LineItem {
                grain_id: GrainId::from("wheat-001"),
                grain_name: "Premium Wheat".to_string(),
                quantity_kg: 2.0,
                price_per_kg: Decimal::from(45),
                grind: GrindOption::Fine,
            },
            LineItem {
                grain_id: GrainId::from("oats-001"),
                grain_name: "Steel Cut Oats".to_string(),
                quantity_kg: 1.0,
                price_per_kg: Decimal::from(95),
                grind: GrindOption::Whole,
            },
        ];
        let order = Order::build(
            CustomerId::new(),
            items,
            DeliveryAddress {
                recipient: "A. Miller".to_string(),
                phone: "+1 555 0100".to_string(),
                street: "12 Granary Lane".to_string(),
                city: "Minneapolis".to_string(),
                postal_code: "55401".to_string(),
            },
            OrderPriority::Standard,
        )
        .unwrap();
        // 45*2 + 12 + 95*1 + 0
        assert_eq!(order.total_amount, Decimal::from(197));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }
}
