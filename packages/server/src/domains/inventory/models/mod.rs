pub mod inventory_alert;
pub mod stock_batch;

pub use inventory_alert::{AlertKind, AlertSeverity, AlertStatus, InventoryAlert};
pub use stock_batch::{
    QualityMetrics, StockBatch, DEFAULT_MINIMUM_THRESHOLD, MAX_CONTAMINATION, MIN_PURITY,
    MOISTURE_RANGE,
};
