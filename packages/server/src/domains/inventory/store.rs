//! Storage contract for the stock ledger.
//!
//! Every mutation in this trait is atomic at the store: the condition check
//! and the counter update happen in one step, because concurrent workers
//! sharing the system of record race over the same batches as a matter of
//! course. An in-process lock is not a substitute; the Postgres
//! implementation expresses each mutation as a single conditional `UPDATE`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::common::{AlertId, BatchId, CoreResult, GrainId};

use super::models::{AlertKind, InventoryAlert, StockBatch};

#[async_trait]
pub trait BaseInventoryStore: Send + Sync {
    /// Reserve `quantity_kg` against the oldest batch of the grain that can
    /// cover it, checking and updating in one atomic step. `None` means no
    /// batch qualified at evaluation time; no partial reservation is left
    /// behind.
    async fn try_reserve(&self, grain_id: &GrainId, quantity_kg: f64)
        -> CoreResult<Option<StockBatch>>;

    /// Return reserved kilograms to availability, clamped to what is
    /// actually reserved so duplicate releases are idempotent.
    async fn release(&self, grain_id: &GrainId, quantity_kg: f64)
        -> CoreResult<Option<StockBatch>>;

    /// Permanently deduct reserved stock (payment cleared); clamped, and
    /// `available_stock` is left unchanged.
    async fn consume(&self, grain_id: &GrainId, quantity_kg: f64)
        -> CoreResult<Option<StockBatch>>;

    async fn insert_batch(&self, batch: StockBatch) -> CoreResult<StockBatch>;

    async fn find_batch(&self, batch_id: BatchId) -> CoreResult<Option<StockBatch>>;

    async fn list_batches(&self) -> CoreResult<Vec<StockBatch>>;

    /// Kilograms still reservable across all batches of a grain.
    async fn available_stock(&self, grain_id: &GrainId) -> CoreResult<f64>;

    /// Physical kilograms on hand across all batches of a grain.
    async fn total_stock(&self, grain_id: &GrainId) -> CoreResult<f64>;

    async fn insert_alert(&self, alert: InventoryAlert) -> CoreResult<()>;

    async fn active_alerts(&self, limit: i64) -> CoreResult<Vec<InventoryAlert>>;

    async fn acknowledge_alert(&self, alert_id: AlertId) -> CoreResult<Option<InventoryAlert>>;

    async fn has_active_alert(&self, batch_id: BatchId, kind: AlertKind) -> CoreResult<bool>;
}

/// Postgres-backed inventory store; delegates to the model queries.
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseInventoryStore for PgInventoryStore {
    async fn try_reserve(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
    ) -> CoreResult<Option<StockBatch>> {
        StockBatch::try_reserve(grain_id, quantity_kg, &self.pool).await
    }

    async fn release(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
    ) -> CoreResult<Option<StockBatch>> {
        StockBatch::release(grain_id, quantity_kg, &self.pool).await
    }

    async fn consume(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
    ) -> CoreResult<Option<StockBatch>> {
        StockBatch::consume(grain_id, quantity_kg, &self.pool).await
    }

    async fn insert_batch(&self, batch: StockBatch) -> CoreResult<StockBatch> {
        StockBatch::insert(&batch, &self.pool).await
    }

    async fn find_batch(&self, batch_id: BatchId) -> CoreResult<Option<StockBatch>> {
        StockBatch::find_by_batch_id(batch_id, &self.pool).await
    }

    async fn list_batches(&self) -> CoreResult<Vec<StockBatch>> {
        StockBatch::list_all(&self.pool).await
    }

    async fn available_stock(&self, grain_id: &GrainId) -> CoreResult<f64> {
        StockBatch::available_for_grain(grain_id, &self.pool).await
    }

    async fn total_stock(&self, grain_id: &GrainId) -> CoreResult<f64> {
        StockBatch::total_for_grain(grain_id, &self.pool).await
    }

    async fn insert_alert(&self, alert: InventoryAlert) -> CoreResult<()> {
        InventoryAlert::insert(&alert, &self.pool).await
    }

    async fn active_alerts(&self, limit: i64) -> CoreResult<Vec<InventoryAlert>> {
        InventoryAlert::list_active(limit, &self.pool).await
    }

    async fn acknowledge_alert(&self, alert_id: AlertId) -> CoreResult<Option<InventoryAlert>> {
        InventoryAlert::acknowledge(alert_id, &self.pool).await
    }

    async fn has_active_alert(&self, batch_id: BatchId, kind: AlertKind) -> CoreResult<bool> {
        InventoryAlert::exists_active(batch_id, kind, &self.pool).await
    }
}
