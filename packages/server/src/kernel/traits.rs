// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. The surrounding
// platform (catalog, payment gateway, access control) is reached exclusively
// through these narrow interfaces, so the core can be exercised against
// mocks without any of those systems running.
//
// Naming convention: Base* for trait names (e.g., BaseCatalogService)

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::common::{CustomerId, GrainId, OrderId};

// =============================================================================
// Caller identity (resolved by access control)
// =============================================================================

/// Role enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Operator,
    Admin,
}

impl Role {
    /// Whether the role may drive manual order transitions.
    pub fn can_manage_orders(self) -> bool {
        matches!(self, Role::Operator | Role::Admin)
    }
}

/// The resolved caller of a request. The core only ever sees this, never
/// credentials.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Rate-limiting key (e.g. source address).
    pub identity: String,
    pub customer_id: CustomerId,
    pub role: Role,
}

// =============================================================================
// Catalog Service Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseCatalogService: Send + Sync {
    /// Push the aggregate stock figure for a grain to the catalog-facing
    /// record after consumption or replenishment.
    async fn push_stock_total(&self, grain_id: &GrainId, total_kg: f64) -> Result<()>;
}

// =============================================================================
// Payment Service Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BasePaymentService: Send + Sync {
    /// Register a payable amount for an order with the gateway and return
    /// the external payment reference.
    async fn create_payment(&self, order_id: OrderId, amount: Decimal) -> Result<String>;

    /// Whether the gateway reports this payment as settled. Signature and
    /// amount verification live on the gateway side.
    async fn verify_payment(&self, payment_ref: &str) -> Result<bool>;
}

// =============================================================================
// Access Control Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseAccessControl: Send + Sync {
    /// Resolve a caller token to an identity and role.
    async fn resolve(&self, token: &str) -> Result<Caller>;
}
