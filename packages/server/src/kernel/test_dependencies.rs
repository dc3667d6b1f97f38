// TestDependencies - mock implementations for testing
//
// In-memory stores that honor the same atomic check-and-mutate contracts as
// the Postgres implementations (each operation runs under one lock), plus
// recording mocks for the external collaborators. Lets the whole core run
// with no database and no surrounding platform.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::common::{AlertId, BatchId, CoreResult, CustomerId, GrainId, OrderId};
use crate::config::Config;
use crate::domains::inventory::models::{AlertKind, AlertStatus, InventoryAlert, StockBatch};
use crate::domains::inventory::store::BaseInventoryStore;
use crate::domains::orders::models::{Actor, Order, OrderStatus, OrderStatusEvent, PaymentStatus};
use crate::domains::orders::store::{BaseOrderStore, TransitionOutcome};

use super::deps::ServerDeps;
use super::traits::{BaseAccessControl, BaseCatalogService, BasePaymentService, Caller, Role};

// =============================================================================
// In-memory inventory store
// =============================================================================

#[derive(Default)]
struct MemoryInventory {
    batches: Vec<StockBatch>,
    alerts: Vec<InventoryAlert>,
}

#[derive(Default)]
pub struct MemoryInventoryStore {
    state: Mutex<MemoryInventory>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn oldest_matching(batches: &[StockBatch], pick: impl Fn(&StockBatch) -> bool) -> Option<usize> {
        batches
            .iter()
            .enumerate()
            .filter(|(_, b)| pick(b))
            .min_by_key(|(_, b)| b.received_at)
            .map(|(i, _)| i)
    }
}

#[async_trait]
impl BaseInventoryStore for MemoryInventoryStore {
    async fn try_reserve(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
    ) -> CoreResult<Option<StockBatch>> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::oldest_matching(&state.batches, |b| {
            b.grain_id == *grain_id && b.available_stock >= quantity_kg
        });
        Ok(idx.map(|i| {
            let batch = &mut state.batches[i];
            batch.reserved_stock += quantity_kg;
            batch.available_stock -= quantity_kg;
            batch.updated_at = Utc::now();
            batch.clone()
        }))
    }

    async fn release(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
    ) -> CoreResult<Option<StockBatch>> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::oldest_matching(&state.batches, |b| {
            b.grain_id == *grain_id && b.reserved_stock > 0.0
        });
        Ok(idx.map(|i| {
            let batch = &mut state.batches[i];
            let delta = quantity_kg.min(batch.reserved_stock);
            batch.reserved_stock -= delta;
            batch.available_stock += delta;
            batch.updated_at = Utc::now();
            batch.clone()
        }))
    }

    async fn consume(
        &self,
        grain_id: &GrainId,
        quantity_kg: f64,
    ) -> CoreResult<Option<StockBatch>> {
        let mut state = self.state.lock().unwrap();
        let idx = Self::oldest_matching(&state.batches, |b| {
            b.grain_id == *grain_id && b.reserved_stock > 0.0
        });
        Ok(idx.map(|i| {
            let batch = &mut state.batches[i];
            let delta = quantity_kg.min(batch.reserved_stock).min(batch.current_stock);
            batch.current_stock -= delta;
            batch.reserved_stock -= delta;
            batch.updated_at = Utc::now();
            batch.clone()
        }))
    }

    async fn insert_batch(&self, batch: StockBatch) -> CoreResult<StockBatch> {
        let mut state = self.state.lock().unwrap();
        state.batches.push(batch.clone());
        Ok(batch)
    }

    async fn find_batch(&self, batch_id: BatchId) -> CoreResult<Option<StockBatch>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .batches
            .iter()
            .find(|b| b.batch_id == batch_id)
            .cloned())
    }

    async fn list_batches(&self) -> CoreResult<Vec<StockBatch>> {
        let state = self.state.lock().unwrap();
        let mut batches = state.batches.clone();
        batches.sort_by(|a, b| {
            (a.grain_id.as_str(), a.received_at).cmp(&(b.grain_id.as_str(), b.received_at))
        });
        Ok(batches)
    }

    async fn available_stock(&self, grain_id: &GrainId) -> CoreResult<f64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .batches
            .iter()
            .filter(|b| b.grain_id == *grain_id)
            .map(|b| b.available_stock)
            .sum())
    }

    async fn total_stock(&self, grain_id: &GrainId) -> CoreResult<f64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .batches
            .iter()
            .filter(|b| b.grain_id == *grain_id)
            .map(|b| b.current_stock)
            .sum())
    }

    async fn insert_alert(&self, alert: InventoryAlert) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.alerts.push(alert);
        Ok(())
    }

    async fn active_alerts(&self, limit: i64) -> CoreResult<Vec<InventoryAlert>> {
        let state = self.state.lock().unwrap();
        let mut alerts: Vec<InventoryAlert> = state
            .alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(alerts)
    }

    async fn acknowledge_alert(&self, alert_id: AlertId) -> CoreResult<Option<InventoryAlert>> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.status == AlertStatus::Active)
            .map(|a| {
                a.status = AlertStatus::Acknowledged;
                a.clone()
            }))
    }

    async fn has_active_alert(&self, batch_id: BatchId, kind: AlertKind) -> CoreResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.alerts.iter().any(|a| {
            a.status == AlertStatus::Active && a.kind == kind && a.batch_id() == Some(batch_id)
        }))
    }
}

// =============================================================================
// In-memory order store
// =============================================================================

#[derive(Default)]
struct MemoryOrders {
    orders: Vec<Order>,
    events: Vec<OrderStatusEvent>,
}

#[derive(Default)]
pub struct MemoryOrderStore {
    state: Mutex<MemoryOrders>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test support: rewind an order's `updated_at` so it counts as dwelt.
    pub fn backdate(&self, id: OrderId, updated_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(order) = state.orders.iter_mut().find(|o| o.id == id) {
            order.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl BaseOrderStore for MemoryOrderStore {
    async fn insert_order(&self, order: Order, event: OrderStatusEvent) -> CoreResult<Order> {
        let mut state = self.state.lock().unwrap();
        state.orders.push(order.clone());
        state.events.push(event);
        Ok(order)
    }

    async fn find_order(&self, id: OrderId) -> CoreResult<Option<Order>> {
        let state = self.state.lock().unwrap();
        Ok(state.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn orders_for_customer(&self, customer_id: CustomerId) -> CoreResult<Vec<Order>> {
        let state = self.state.lock().unwrap();
        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> CoreResult<TransitionOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.orders.iter().position(|o| o.id == id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !expected.contains(&state.orders[idx].status) {
            return Ok(TransitionOutcome::StaleState(state.orders[idx].status));
        }
        state.orders[idx].status = to;
        state.orders[idx].updated_at = Utc::now();
        let order = state.orders[idx].clone();
        state
            .events
            .push(OrderStatusEvent::new(id, to, actor, note));
        Ok(TransitionOutcome::Applied(order))
    }

    async fn mark_paid(&self, id: OrderId, payment_ref: Option<&str>) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(order) = state.orders.iter_mut().find(|o| o.id == id) {
            order.payment_status = PaymentStatus::Paid;
            if let Some(payment_ref) = payment_ref {
                order.payment_ref = Some(payment_ref.to_string());
            }
        }
        Ok(())
    }

    async fn find_stalled(
        &self,
        statuses: &[OrderStatus],
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Order>> {
        let state = self.state.lock().unwrap();
        let mut stalled: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| statuses.contains(&o.status) && o.updated_at < stale_before)
            .cloned()
            .collect();
        stalled.sort_by_key(|o| o.updated_at);
        stalled.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stalled)
    }

    async fn events_for_order(&self, id: OrderId) -> CoreResult<Vec<OrderStatusEvent>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<OrderStatusEvent> = state
            .events
            .iter()
            .filter(|e| e.order_id == id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.at);
        Ok(events)
    }

    async fn paid_quantity_since(
        &self,
        grain_id: &GrainId,
        since: DateTime<Utc>,
    ) -> CoreResult<f64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .filter(|o| o.payment_status == PaymentStatus::Paid && o.created_at >= since)
            .flat_map(|o| o.line_items.iter())
            .filter(|item| item.grain_id == *grain_id)
            .map(|item| item.quantity_kg)
            .sum())
    }
}

// =============================================================================
// Mock collaborators
// =============================================================================

#[derive(Default)]
pub struct MockCatalogService {
    pushes: Mutex<Vec<(GrainId, f64)>>,
}

impl MockCatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock totals pushed so far, in call order.
    pub fn pushes(&self) -> Vec<(GrainId, f64)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseCatalogService for MockCatalogService {
    async fn push_stock_total(&self, grain_id: &GrainId, total_kg: f64) -> Result<()> {
        self.pushes.lock().unwrap().push((grain_id.clone(), total_kg));
        Ok(())
    }
}

pub struct MockPaymentService {
    verify_result: AtomicBool,
    counter: AtomicUsize,
    created: Mutex<Vec<(OrderId, Decimal)>>,
}

impl MockPaymentService {
    pub fn new() -> Self {
        Self {
            verify_result: AtomicBool::new(true),
            counter: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent verifications fail.
    pub fn refuse_verification(&self) {
        self.verify_result.store(false, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<(OrderId, Decimal)> {
        self.created.lock().unwrap().clone()
    }
}

impl Default for MockPaymentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePaymentService for MockPaymentService {
    async fn create_payment(&self, order_id: OrderId, amount: Decimal) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push((order_id, amount));
        Ok(format!("PAY-TEST-{n}"))
    }

    async fn verify_payment(&self, _payment_ref: &str) -> Result<bool> {
        Ok(self.verify_result.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct MockAccessControl {
    callers: Mutex<HashMap<String, Caller>>,
}

impl MockAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token so `resolve` recognizes it.
    pub fn grant(&self, token: &str, caller: Caller) {
        self.callers
            .lock()
            .unwrap()
            .insert(token.to_string(), caller);
    }
}

#[async_trait]
impl BaseAccessControl for MockAccessControl {
    async fn resolve(&self, token: &str) -> Result<Caller> {
        self.callers
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| anyhow!("unknown token"))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Full in-memory wiring of the core, with the concrete stores and mocks
/// kept accessible for assertions.
pub struct TestDependencies {
    pub deps: ServerDeps,
    pub inventory: Arc<MemoryInventoryStore>,
    pub orders: Arc<MemoryOrderStore>,
    pub catalog: Arc<MockCatalogService>,
    pub payments: Arc<MockPaymentService>,
    pub access_control: Arc<MockAccessControl>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let inventory = Arc::new(MemoryInventoryStore::new());
        let orders = Arc::new(MemoryOrderStore::new());
        let catalog = Arc::new(MockCatalogService::new());
        let payments = Arc::new(MockPaymentService::new());
        let access_control = Arc::new(MockAccessControl::new());

        let deps = ServerDeps::new(
            config,
            inventory.clone(),
            orders.clone(),
            catalog.clone(),
            payments.clone(),
            access_control.clone(),
        );

        Self {
            deps,
            inventory,
            orders,
            catalog,
            payments,
            access_control,
        }
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

/// Defaults mirroring production, with no database behind them.
pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        rate_limit_requests: 100,
        rate_limit_window: Duration::from_secs(60),
        catalog_cache_ttl: Duration::from_secs(300),
        customer_orders_cache_ttl: Duration::from_secs(300),
        session_cache_ttl: Duration::from_secs(900),
        progress_interval: Duration::from_secs(60),
        progress_dwell: Duration::from_secs(300),
        inventory_scan_interval: Duration::from_secs(3600),
        storage_deadline: Duration::from_secs(5),
        alert_dedup: true,
    }
}

pub fn customer_caller(customer_id: CustomerId) -> Caller {
    Caller {
        identity: format!("client-{customer_id}"),
        customer_id,
        role: Role::Customer,
    }
}

pub fn operator_caller() -> Caller {
    Caller {
        identity: "ops-console".to_string(),
        customer_id: CustomerId::new(),
        role: Role::Operator,
    }
}
