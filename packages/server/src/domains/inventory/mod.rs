//! Inventory: per-batch stock records, atomic reserve/release/consume, and
//! operational alerting.

pub mod ledger;
pub mod models;
pub mod store;

pub use ledger::{InventorySummary, ScanReport, StockLedger};
pub use store::{BaseInventoryStore, PgInventoryStore};
