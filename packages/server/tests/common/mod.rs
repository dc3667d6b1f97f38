//! Shared builders for the integration tests.

#![allow(dead_code)]

use rust_decimal::Decimal;
use server_core::common::GrainId;
use server_core::domains::inventory::models::StockBatch;
use server_core::domains::orders::models::{DeliveryAddress, GrindOption, LineItem, OrderPriority};
use server_core::domains::orders::NewOrder;
use server_core::kernel::TestDependencies;

pub fn wheat() -> GrainId {
    GrainId::from("wheat-001")
}

pub fn millet() -> GrainId {
    GrainId::from("millet-001")
}

/// Seed a batch with `quantity_kg` on hand through the ledger, so catalog
/// pushes and cache invalidation behave as in production.
pub async fn seed_batch(ctx: &TestDependencies, grain_id: &GrainId, quantity_kg: f64) -> StockBatch {
    ctx.deps
        .ledger
        .replenish(
            grain_id,
            quantity_kg,
            "SUP-DEFAULT".into(),
            Decimal::from(30),
            None,
        )
        .await
        .expect("failed to seed batch")
}

pub fn line_item(grain_id: &GrainId, quantity_kg: f64) -> LineItem {
    LineItem {
        grain_id: grain_id.clone(),
        grain_name: format!("Grain {grain_id}"),
        quantity_kg,
        price_per_kg: Decimal::from(45),
        grind: GrindOption::Medium,
    }
}

pub fn delivery_address() -> DeliveryAddress {
    DeliveryAddress {
        recipient: "A. Miller".to_string(),
        phone: "+1 555 0100".to_string(),
        street: "12 Granary Lane".to_string(),
        city: "Minneapolis".to_string(),
        postal_code: "55401".to_string(),
    }
}

pub fn new_order(line_items: Vec<LineItem>) -> NewOrder {
    NewOrder {
        line_items,
        delivery_address: delivery_address(),
        priority: OrderPriority::Standard,
    }
}
