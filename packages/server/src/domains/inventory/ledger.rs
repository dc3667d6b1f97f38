//! The stock ledger: the one place that guarantees reservations never
//! exceed physical stock, and the source of operational alerts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

use crate::common::{AlertId, CoreError, CoreResult, GrainId, SupplierId};
use crate::domains::orders::store::BaseOrderStore;
use crate::kernel::cache::{catalog_key, ReadThroughCache};
use crate::kernel::traits::BaseCatalogService;
use crate::kernel::with_deadline;

use super::models::{AlertKind, InventoryAlert, QualityMetrics, StockBatch};
use super::store::BaseInventoryStore;

/// Default bound for alert listings.
pub const DEFAULT_ALERT_PAGE: i64 = 50;

/// Outcome of one inventory scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub batches_scanned: usize,
    pub alerts_raised: usize,
    pub failures: usize,
}

/// Aggregated view over the ledger, for dashboards and ops tooling.
#[derive(Debug, Default, serde::Serialize)]
pub struct InventorySummary {
    pub total_batches: usize,
    pub total_value: Decimal,
    pub low_stock_batches: usize,
    pub quality_issue_batches: usize,
    pub expiring_soon: usize,
    pub active_alerts_by_kind: HashMap<String, usize>,
}

pub struct StockLedger {
    store: Arc<dyn BaseInventoryStore>,
    catalog: Arc<dyn BaseCatalogService>,
    cache: Arc<ReadThroughCache>,
    storage_deadline: Duration,
    alert_dedup: bool,
}

impl StockLedger {
    pub fn new(
        store: Arc<dyn BaseInventoryStore>,
        catalog: Arc<dyn BaseCatalogService>,
        cache: Arc<ReadThroughCache>,
        storage_deadline: Duration,
        alert_dedup: bool,
    ) -> Self {
        Self {
            store,
            catalog,
            cache,
            storage_deadline,
            alert_dedup,
        }
    }

    /// Place a soft hold of `quantity_kg` against the grain's stock.
    ///
    /// The check-and-decrement is one atomic store operation; when it does
    /// not go through, nothing was reserved and the caller gets
    /// `InsufficientStock` with the availability at evaluation time.
    pub async fn reserve(&self, grain_id: &GrainId, quantity_kg: f64) -> CoreResult<StockBatch> {
        ensure_positive(quantity_kg)?;
        let reserved = with_deadline(
            self.storage_deadline,
            self.store.try_reserve(grain_id, quantity_kg),
        )
        .await?;
        match reserved {
            Some(batch) => Ok(batch),
            None => {
                let available = self
                    .store
                    .available_stock(grain_id)
                    .await
                    .unwrap_or_default();
                Err(CoreError::InsufficientStock {
                    grain_id: grain_id.clone(),
                    requested: quantity_kg,
                    available,
                })
            }
        }
    }

    /// Undo a reservation (order cancelled before fulfilment). Clamped in
    /// the store, so releasing more than is reserved is a harmless no-op.
    pub async fn release(&self, grain_id: &GrainId, quantity_kg: f64) -> CoreResult<()> {
        ensure_positive(quantity_kg)?;
        let released = with_deadline(
            self.storage_deadline,
            self.store.release(grain_id, quantity_kg),
        )
        .await?;
        if released.is_none() {
            tracing::debug!(grain_id = %grain_id, "release found no reserved stock");
        }
        Ok(())
    }

    /// Make a reservation permanent once payment has cleared, and propagate
    /// the new aggregate to the catalog.
    pub async fn consume(&self, grain_id: &GrainId, quantity_kg: f64) -> CoreResult<()> {
        ensure_positive(quantity_kg)?;
        let consumed = with_deadline(
            self.storage_deadline,
            self.store.consume(grain_id, quantity_kg),
        )
        .await?;
        if consumed.is_none() {
            tracing::warn!(grain_id = %grain_id, "consume found no reserved stock");
        }
        self.push_catalog_total(grain_id).await;
        Ok(())
    }

    /// Receive new stock as a fresh batch.
    pub async fn replenish(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
        supplier_id: SupplierId,
        cost_per_kg: Decimal,
        quality: Option<QualityMetrics>,
    ) -> CoreResult<StockBatch> {
        ensure_positive(quantity_kg)?;
        let batch = StockBatch::receive(
            grain_id.clone(),
            quantity_kg,
            supplier_id,
            cost_per_kg,
            quality,
        );
        let batch = with_deadline(self.storage_deadline, self.store.insert_batch(batch)).await?;
        tracing::info!(
            grain_id = %grain_id,
            batch_id = %batch.batch_id,
            quantity_kg,
            "stock replenished"
        );
        self.push_catalog_total(grain_id).await;
        Ok(batch)
    }

    /// Catalog pushes and cache eviction are never fatal to the stock
    /// mutation that triggered them.
    async fn push_catalog_total(&self, grain_id: &GrainId) {
        match self.store.total_stock(grain_id).await {
            Ok(total) => {
                if let Err(e) = self.catalog.push_stock_total(grain_id, total).await {
                    tracing::warn!(grain_id = %grain_id, error = %e, "catalog stock push failed");
                }
            }
            Err(e) => {
                tracing::warn!(grain_id = %grain_id, error = %e, "could not aggregate stock for catalog");
            }
        }
        self.cache.invalidate(&catalog_key()).await;
    }

    // =========================================================================
    // Alerting
    // =========================================================================

    /// Evaluate every batch against the four alert rules. One batch failing
    /// does not stop the scan; failures are counted and logged.
    pub async fn scan(&self, orders: &dyn BaseOrderStore) -> CoreResult<ScanReport> {
        let batches = self.store.list_batches().await?;
        let mut report = ScanReport {
            batches_scanned: batches.len(),
            ..Default::default()
        };
        for batch in &batches {
            match self.scan_batch(batch, orders).await {
                Ok(raised) => report.alerts_raised += raised,
                Err(e) => {
                    tracing::error!(batch_id = %batch.batch_id, error = %e, "scan failed for batch");
                    report.failures += 1;
                }
            }
        }
        tracing::info!(
            batches = report.batches_scanned,
            alerts = report.alerts_raised,
            failures = report.failures,
            "inventory scan complete"
        );
        Ok(report)
    }

    async fn scan_batch(
        &self,
        batch: &StockBatch,
        orders: &dyn BaseOrderStore,
    ) -> CoreResult<usize> {
        let now = Utc::now();
        let mut raised = 0;

        // Rule 1: stock level.
        if batch.available_stock <= 0.0 {
            raised += self
                .raise(
                    batch,
                    AlertKind::OutOfStock,
                    format!("Grain {} is out of stock", batch.grain_id),
                    json!({
                        "grain_id": batch.grain_id,
                        "batch_id": batch.batch_id.to_string(),
                    }),
                )
                .await?;
        } else if batch.available_stock <= batch.minimum_threshold {
            raised += self
                .raise(
                    batch,
                    AlertKind::LowStock,
                    format!("Grain {} stock is below minimum threshold", batch.grain_id),
                    json!({
                        "grain_id": batch.grain_id,
                        "batch_id": batch.batch_id.to_string(),
                        "available_stock": batch.available_stock,
                    }),
                )
                .await?;
        }

        // Rule 2: quality bands.
        let issues = batch.quality.violations();
        if !issues.is_empty() {
            raised += self
                .raise(
                    batch,
                    AlertKind::QualityIssue,
                    format!(
                        "Quality issues detected for grain {}: {}",
                        batch.grain_id,
                        issues.join("; ")
                    ),
                    json!({
                        "grain_id": batch.grain_id,
                        "batch_id": batch.batch_id.to_string(),
                        "issues": issues,
                    }),
                )
                .await?;
        }

        // Rule 3: approaching expiry.
        if let Some(days) = batch.days_to_expiry(now) {
            if (0..=30).contains(&days) {
                raised += self
                    .raise(
                        batch,
                        AlertKind::ExpiryWarning,
                        format!("Grain {} expires in {days} days", batch.grain_id),
                        json!({
                            "grain_id": batch.grain_id,
                            "batch_id": batch.batch_id.to_string(),
                            "days_to_expiry": days,
                        }),
                    )
                    .await?;
            }
        }

        // Rule 4: projected demand vs availability.
        let consumed = orders
            .paid_quantity_since(&batch.grain_id, now - chrono::Duration::days(30))
            .await?;
        let daily_demand = if consumed > 0.0 { consumed / 30.0 } else { 0.1 };
        let projected = daily_demand * 30.0 * 1.5;
        if projected > batch.available_stock {
            let recommended = (batch.optimal_stock - batch.available_stock).max(projected);
            raised += self
                .raise(
                    batch,
                    AlertKind::ReorderNeeded,
                    format!("Reorder needed for grain {}", batch.grain_id),
                    json!({
                        "grain_id": batch.grain_id,
                        "batch_id": batch.batch_id.to_string(),
                        "available_stock": batch.available_stock,
                        "projected_demand": projected,
                        "recommended_order_quantity": (recommended * 100.0).round() / 100.0,
                        "supplier_id": batch.supplier_id,
                    }),
                )
                .await?;
        }

        Ok(raised)
    }

    /// Append one alert, unless duplicate suppression says the batch already
    /// has an active alert of this kind.
    async fn raise(
        &self,
        batch: &StockBatch,
        kind: AlertKind,
        message: String,
        metadata: serde_json::Value,
    ) -> CoreResult<usize> {
        if self.alert_dedup && self.store.has_active_alert(batch.batch_id, kind).await? {
            return Ok(0);
        }
        let alert = InventoryAlert::new(kind, message, metadata);
        tracing::info!(
            kind = %alert.kind,
            severity = %alert.severity,
            "INVENTORY ALERT: {}",
            alert.message
        );
        self.store.insert_alert(alert).await?;
        Ok(1)
    }

    /// Active alerts, most recent first.
    pub async fn active_alerts(&self, limit: Option<i64>) -> CoreResult<Vec<InventoryAlert>> {
        self.store
            .active_alerts(limit.unwrap_or(DEFAULT_ALERT_PAGE))
            .await
    }

    pub async fn acknowledge(&self, alert_id: AlertId) -> CoreResult<InventoryAlert> {
        self.store
            .acknowledge_alert(alert_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("active alert {alert_id}")))
    }

    /// Aggregate figures across all batches plus the active-alert tally.
    pub async fn summary(&self) -> CoreResult<InventorySummary> {
        let batches = self.store.list_batches().await?;
        let now = Utc::now();
        let mut summary = InventorySummary {
            total_batches: batches.len(),
            ..Default::default()
        };
        for batch in &batches {
            let stock = Decimal::try_from(batch.current_stock).unwrap_or(Decimal::ZERO);
            summary.total_value += stock * batch.cost_per_kg;
            if batch.available_stock <= batch.minimum_threshold {
                summary.low_stock_batches += 1;
            }
            if !batch.quality.violations().is_empty() {
                summary.quality_issue_batches += 1;
            }
            if matches!(batch.days_to_expiry(now), Some(days) if days <= 30) {
                summary.expiring_soon += 1;
            }
        }
        for alert in self.store.active_alerts(i64::MAX).await? {
            *summary
                .active_alerts_by_kind
                .entry(alert.kind.to_string())
                .or_insert(0) += 1;
        }
        Ok(summary)
    }
}

fn ensure_positive(quantity_kg: f64) -> CoreResult<()> {
    if quantity_kg.is_finite() && quantity_kg > 0.0 {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "quantity must be a positive number of kg, got {quantity_kg}"
        )))
    }
}
