//! Server dependencies - the explicit service context.
//!
//! Everything the core needs is constructed once at startup and carried in
//! this container; there are no ambient globals. External collaborators come
//! in through their `Base*` traits so tests can swap in mocks.

use std::sync::Arc;

use sqlx::PgPool;

use crate::common::{CoreError, CoreResult};
use crate::config::Config;
use crate::domains::inventory::{BaseInventoryStore, PgInventoryStore, StockLedger};
use crate::domains::orders::{BaseOrderStore, OrderLifecycle, PgOrderStore};

use super::cache::ReadThroughCache;
use super::notifications::NotificationHub;
use super::rate_limit::RateLimiter;
use super::traits::{BaseAccessControl, BaseCatalogService, BasePaymentService, Caller};

/// Server dependencies accessible to every operation.
#[derive(Clone)]
pub struct ServerDeps {
    pub config: Config,
    pub inventory_store: Arc<dyn BaseInventoryStore>,
    pub order_store: Arc<dyn BaseOrderStore>,
    pub catalog: Arc<dyn BaseCatalogService>,
    pub payments: Arc<dyn BasePaymentService>,
    pub access_control: Arc<dyn BaseAccessControl>,
    pub cache: Arc<ReadThroughCache>,
    pub notifications: Arc<NotificationHub>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ledger: Arc<StockLedger>,
    pub lifecycle: Arc<OrderLifecycle>,
}

impl ServerDeps {
    /// Wire the full context from stores and collaborators.
    pub fn new(
        config: Config,
        inventory_store: Arc<dyn BaseInventoryStore>,
        order_store: Arc<dyn BaseOrderStore>,
        catalog: Arc<dyn BaseCatalogService>,
        payments: Arc<dyn BasePaymentService>,
        access_control: Arc<dyn BaseAccessControl>,
    ) -> Self {
        let cache = Arc::new(ReadThroughCache::new());
        let notifications = Arc::new(NotificationHub::new());
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window,
        ));
        let ledger = Arc::new(StockLedger::new(
            inventory_store.clone(),
            catalog.clone(),
            cache.clone(),
            config.storage_deadline,
            config.alert_dedup,
        ));
        let lifecycle = Arc::new(OrderLifecycle::new(
            order_store.clone(),
            ledger.clone(),
            payments.clone(),
            cache.clone(),
            notifications.clone(),
            rate_limiter.clone(),
            config.customer_orders_cache_ttl,
            config.storage_deadline,
        ));

        Self {
            config,
            inventory_store,
            order_store,
            catalog,
            payments,
            access_control,
            cache,
            notifications,
            rate_limiter,
            ledger,
            lifecycle,
        }
    }

    /// Resolve a caller token through the access-control collaborator. The
    /// core only ever works with the resulting identity and role.
    pub async fn resolve_caller(&self, token: &str) -> CoreResult<Caller> {
        self.access_control
            .resolve(token)
            .await
            .map_err(|e| CoreError::Unauthorized(e.to_string()))
    }

    /// Production wiring against Postgres.
    pub fn postgres(
        config: Config,
        pool: PgPool,
        catalog: Arc<dyn BaseCatalogService>,
        payments: Arc<dyn BasePaymentService>,
        access_control: Arc<dyn BaseAccessControl>,
    ) -> Self {
        Self::new(
            config,
            Arc::new(PgInventoryStore::new(pool.clone())),
            Arc::new(PgOrderStore::new(pool)),
            catalog,
            payments,
            access_control,
        )
    }
}
