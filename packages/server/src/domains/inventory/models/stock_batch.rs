use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{BatchId, CoreError, CoreResult, GrainId, SupplierId};

/// Acceptable moisture band for stored grain, in percent.
pub const MOISTURE_RANGE: (f64, f64) = (8.0, 14.0);
/// Minimum acceptable purity, in percent.
pub const MIN_PURITY: f64 = 95.0;
/// Maximum acceptable contamination level, in percent.
pub const MAX_CONTAMINATION: f64 = 2.0;

/// Default minimum stock threshold for newly received batches, in kg.
pub const DEFAULT_MINIMUM_THRESHOLD: f64 = 10.0;
/// Shelf life assumed when the supplier gives no expiry date.
pub const DEFAULT_SHELF_LIFE_DAYS: i64 = 365;

/// Lab measurements for a received batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub moisture_content: f64,
    pub purity_percentage: f64,
    pub freshness_score: f64,
    pub contamination_level: f64,
    pub overall_grade: String,
    pub tested_at: DateTime<Utc>,
}

impl QualityMetrics {
    /// Grade-A figures recorded when a batch arrives without a lab report.
    pub fn assumed_grade_a() -> Self {
        Self {
            moisture_content: 12.0,
            purity_percentage: 98.0,
            freshness_score: 9.0,
            contamination_level: 0.5,
            overall_grade: "A".to_string(),
            tested_at: Utc::now(),
        }
    }

    /// Band violations for this batch; empty when the batch is in spec.
    pub fn violations(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let (min_moisture, max_moisture) = MOISTURE_RANGE;
        if self.moisture_content < min_moisture || self.moisture_content > max_moisture {
            issues.push(format!(
                "Moisture content: {}% (optimal: {min_moisture}-{max_moisture}%)",
                self.moisture_content
            ));
        }
        if self.purity_percentage < MIN_PURITY {
            issues.push(format!(
                "Purity: {}% (minimum: {MIN_PURITY}%)",
                self.purity_percentage
            ));
        }
        if self.contamination_level > MAX_CONTAMINATION {
            issues.push(format!(
                "Contamination level: {}% (maximum: {MAX_CONTAMINATION}%)",
                self.contamination_level
            ));
        }
        issues
    }
}

/// A discrete lot of one grain type with its own stock counters, supplier,
/// quality and expiry attributes.
///
/// Counter invariant: `available_stock = current_stock - reserved_stock`,
/// all three non-negative. Batches are never deleted; an exhausted batch
/// simply sits at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockBatch {
    pub batch_id: BatchId,
    pub grain_id: GrainId,
    pub current_stock: f64,
    pub reserved_stock: f64,
    pub available_stock: f64,
    pub minimum_threshold: f64,
    pub optimal_stock: f64,
    pub cost_per_kg: Decimal,
    pub supplier_id: SupplierId,
    pub quality: QualityMetrics,
    pub location: String,
    pub received_at: DateTime<Utc>,
    pub expiry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StockBatch {
    /// Build a batch record for newly received stock.
    ///
    /// Optimal stock defaults to twice the received quantity, the expiry to
    /// one year out, and quality to assumed grade A when no report came
    /// with the delivery.
    pub fn receive(
        grain_id: GrainId,
        quantity_kg: f64,
        supplier_id: SupplierId,
        cost_per_kg: Decimal,
        quality: Option<QualityMetrics>,
    ) -> Self {
        let now = Utc::now();
        Self {
            batch_id: BatchId::new(),
            grain_id,
            current_stock: quantity_kg,
            reserved_stock: 0.0,
            available_stock: quantity_kg,
            minimum_threshold: DEFAULT_MINIMUM_THRESHOLD,
            optimal_stock: quantity_kg * 2.0,
            cost_per_kg,
            supplier_id,
            quality: quality.unwrap_or_else(QualityMetrics::assumed_grade_a),
            location: "WAREHOUSE_A".to_string(),
            received_at: now,
            expiry_at: Some(now + Duration::days(DEFAULT_SHELF_LIFE_DAYS)),
            updated_at: now,
        }
    }

    /// Days until expiry, when an expiry date is set.
    pub fn days_to_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry_at.map(|expiry| (expiry - now).num_days())
    }
}

// =============================================================================
// Postgres access
// =============================================================================

/// Raw row shape; statuses and nested documents are validated into domain
/// types at this boundary.
#[derive(sqlx::FromRow)]
struct StockBatchRow {
    batch_id: Uuid,
    grain_id: String,
    current_stock: f64,
    reserved_stock: f64,
    available_stock: f64,
    minimum_threshold: f64,
    optimal_stock: f64,
    cost_per_kg: Decimal,
    supplier_id: String,
    quality: serde_json::Value,
    location: String,
    received_at: DateTime<Utc>,
    expiry_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StockBatchRow> for StockBatch {
    type Error = CoreError;

    fn try_from(row: StockBatchRow) -> CoreResult<Self> {
        let quality: QualityMetrics = serde_json::from_value(row.quality)
            .map_err(|e| anyhow!("malformed quality metrics for batch {}: {e}", row.batch_id))?;
        Ok(Self {
            batch_id: BatchId::from_uuid(row.batch_id),
            grain_id: GrainId(row.grain_id),
            current_stock: row.current_stock,
            reserved_stock: row.reserved_stock,
            available_stock: row.available_stock,
            minimum_threshold: row.minimum_threshold,
            optimal_stock: row.optimal_stock,
            cost_per_kg: row.cost_per_kg,
            supplier_id: SupplierId(row.supplier_id),
            quality,
            location: row.location,
            received_at: row.received_at,
            expiry_at: row.expiry_at,
            updated_at: row.updated_at,
        })
    }
}

impl StockBatch {
    /// Atomically reserve `quantity_kg` against the oldest batch of the grain
    /// that can cover it.
    ///
    /// The availability check and the counter update are one conditional
    /// `UPDATE`; two racing reservations can never both be admitted against
    /// the same kilograms. Returns `None` when no batch qualifies at
    /// evaluation time.
    pub async fn try_reserve(
        grain_id: &GrainId,
        quantity_kg: f64,
        pool: &PgPool,
    ) -> CoreResult<Option<StockBatch>> {
        let row = sqlx::query_as::<_, StockBatchRow>(
            "UPDATE stock_batches
                SET reserved_stock = reserved_stock + $2,
                    available_stock = available_stock - $2,
                    updated_at = NOW()
              WHERE available_stock >= $2
                AND batch_id = (
                    SELECT batch_id FROM stock_batches
                     WHERE grain_id = $1 AND available_stock >= $2
                     ORDER BY received_at
                     LIMIT 1
                )
              RETURNING *",
        )
        .bind(grain_id.as_str())
        .bind(quantity_kg)
        .fetch_optional(pool)
        .await?;

        row.map(StockBatch::try_from).transpose()
    }

    /// Return reserved kilograms to availability, oldest batch first.
    ///
    /// The delta is clamped to what is actually reserved, so a duplicate
    /// release is a harmless no-op and the counters never go negative.
    pub async fn release(
        grain_id: &GrainId,
        quantity_kg: f64,
        pool: &PgPool,
    ) -> CoreResult<Option<StockBatch>> {
        let row = sqlx::query_as::<_, StockBatchRow>(
            "UPDATE stock_batches
                SET available_stock = available_stock + LEAST(reserved_stock, $2),
                    reserved_stock  = reserved_stock  - LEAST(reserved_stock, $2),
                    updated_at = NOW()
              WHERE batch_id = (
                    SELECT batch_id FROM stock_batches
                     WHERE grain_id = $1 AND reserved_stock > 0
                     ORDER BY received_at
                     LIMIT 1
                )
              RETURNING *",
        )
        .bind(grain_id.as_str())
        .bind(quantity_kg)
        .fetch_optional(pool)
        .await?;

        row.map(StockBatch::try_from).transpose()
    }

    /// Permanently deduct previously reserved stock, oldest batch first.
    ///
    /// Both `current_stock` and `reserved_stock` drop by the clamped delta,
    /// which leaves `available_stock` untouched.
    pub async fn consume(
        grain_id: &GrainId,
        quantity_kg: f64,
        pool: &PgPool,
    ) -> CoreResult<Option<StockBatch>> {
        let row = sqlx::query_as::<_, StockBatchRow>(
            "UPDATE stock_batches
                SET current_stock  = current_stock  - LEAST(reserved_stock, current_stock, $2),
                    reserved_stock = reserved_stock - LEAST(reserved_stock, current_stock, $2),
                    updated_at = NOW()
              WHERE batch_id = (
                    SELECT batch_id FROM stock_batches
                     WHERE grain_id = $1 AND reserved_stock > 0
                     ORDER BY received_at
                     LIMIT 1
                )
              RETURNING *",
        )
        .bind(grain_id.as_str())
        .bind(quantity_kg)
        .fetch_optional(pool)
        .await?;

        row.map(StockBatch::try_from).transpose()
    }

    pub async fn insert(batch: &StockBatch, pool: &PgPool) -> CoreResult<StockBatch> {
        let quality = serde_json::to_value(&batch.quality)
            .map_err(|e| anyhow!("failed to serialize quality metrics: {e}"))?;
        let row = sqlx::query_as::<_, StockBatchRow>(
            "INSERT INTO stock_batches (
                 batch_id, grain_id, current_stock, reserved_stock, available_stock,
                 minimum_threshold, optimal_stock, cost_per_kg, supplier_id,
                 quality, location, received_at, expiry_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING *",
        )
        .bind(batch.batch_id.as_uuid())
        .bind(batch.grain_id.as_str())
        .bind(batch.current_stock)
        .bind(batch.reserved_stock)
        .bind(batch.available_stock)
        .bind(batch.minimum_threshold)
        .bind(batch.optimal_stock)
        .bind(batch.cost_per_kg)
        .bind(batch.supplier_id.as_str())
        .bind(quality)
        .bind(&batch.location)
        .bind(batch.received_at)
        .bind(batch.expiry_at)
        .bind(batch.updated_at)
        .fetch_one(pool)
        .await?;

        row.try_into()
    }

    pub async fn find_by_batch_id(batch_id: BatchId, pool: &PgPool) -> CoreResult<Option<StockBatch>> {
        let row = sqlx::query_as::<_, StockBatchRow>(
            "SELECT * FROM stock_batches WHERE batch_id = $1",
        )
        .bind(batch_id.as_uuid())
        .fetch_optional(pool)
        .await?;

        row.map(StockBatch::try_from).transpose()
    }

    pub async fn list_all(pool: &PgPool) -> CoreResult<Vec<StockBatch>> {
        let rows = sqlx::query_as::<_, StockBatchRow>(
            "SELECT * FROM stock_batches ORDER BY grain_id, received_at",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(StockBatch::try_from).collect()
    }

    /// Kilograms still reservable across all batches of the grain.
    pub async fn available_for_grain(grain_id: &GrainId, pool: &PgPool) -> CoreResult<f64> {
        let total = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(SUM(available_stock), 0) FROM stock_batches WHERE grain_id = $1",
        )
        .bind(grain_id.as_str())
        .fetch_one(pool)
        .await?;
        Ok(total)
    }

    /// Physical kilograms on hand across all batches of the grain; this is
    /// the figure pushed to the catalog.
    pub async fn total_for_grain(grain_id: &GrainId, pool: &PgPool) -> CoreResult<f64> {
        let total = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(SUM(current_stock), 0) FROM stock_batches WHERE grain_id = $1",
        )
        .bind(grain_id.as_str())
        .fetch_one(pool)
        .await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_defaults_optimal_stock_and_expiry() {
        let batch = StockBatch::receive(
            GrainId::from("wheat-001"),
            50.0,
            SupplierId::from("SUP-7"),
            Decimal::new(315, 1),
            None,
        );
        assert_eq!(batch.optimal_stock, 100.0);
        assert_eq!(batch.minimum_threshold, DEFAULT_MINIMUM_THRESHOLD);
        assert_eq!(batch.available_stock, 50.0);
        assert_eq!(batch.reserved_stock, 0.0);
        assert!(batch.expiry_at.is_some());
        assert_eq!(batch.quality.overall_grade, "A");
    }

    #[test]
    fn quality_violations_cover_each_band() {
        let mut quality = QualityMetrics::assumed_grade_a();
        assert!(quality.violations().is_empty());

        quality.moisture_content = 16.5;
        quality.purity_percentage = 91.0;
        quality.contamination_level = 3.2;
        let issues = quality.violations();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("Moisture"));
        assert!(issues[1].contains("Purity"));
        assert!(issues[2].contains("Contamination"));
    }
}
