//! Concrete collaborator implementations shipped with the core.
//!
//! The catalog adapter writes the aggregate stock figure straight into the
//! catalog's `grains` table. The payment and access-control implementations
//! here are the development-mode stand-ins; production deployments plug in
//! their gateway and identity clients through the same traits.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{CustomerId, GrainId, OrderId};

use super::traits::{BaseAccessControl, BaseCatalogService, BasePaymentService, Caller, Role};

/// Pushes aggregate stock into the catalog's grain records.
pub struct PgCatalogService {
    pool: PgPool,
}

impl PgCatalogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseCatalogService for PgCatalogService {
    async fn push_stock_total(&self, grain_id: &GrainId, total_kg: f64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE grains SET stock_kg = $2, available = ($2 > 0) WHERE id = $1",
        )
        .bind(grain_id.as_str())
        .bind(total_kg)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(grain_id = %grain_id, "catalog has no record for grain");
        }
        Ok(())
    }
}

/// Development payment gateway: issues references and verifies only the ones
/// it issued. No money moves anywhere.
#[derive(Default)]
pub struct SandboxPayments {
    issued: Mutex<HashSet<String>>,
}

impl SandboxPayments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BasePaymentService for SandboxPayments {
    async fn create_payment(&self, order_id: OrderId, amount: Decimal) -> Result<String> {
        let payment_ref = format!("PAY-{}", Uuid::new_v4());
        tracing::info!(order_id = %order_id, %amount, payment_ref = %payment_ref, "sandbox payment registered");
        self.issued.lock().unwrap().insert(payment_ref.clone());
        Ok(payment_ref)
    }

    async fn verify_payment(&self, payment_ref: &str) -> Result<bool> {
        Ok(self.issued.lock().unwrap().contains(payment_ref))
    }
}

/// Development access control: tokens are `<role>:<customer uuid>`.
pub struct DevAccessControl;

#[async_trait]
impl BaseAccessControl for DevAccessControl {
    async fn resolve(&self, token: &str) -> Result<Caller> {
        let (role, customer) = token
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed token"))?;
        let role = match role {
            "customer" => Role::Customer,
            "operator" => Role::Operator,
            "admin" => Role::Admin,
            other => return Err(anyhow!("unknown role: {other}")),
        };
        let customer_id: CustomerId = customer
            .parse()
            .map_err(|e| anyhow!("malformed customer id: {e}"))?;
        Ok(Caller {
            identity: token.to_string(),
            customer_id,
            role,
        })
    }
}
