use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Requests admitted per identity per sliding window.
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub catalog_cache_ttl: Duration,
    pub customer_orders_cache_ttl: Duration,
    pub session_cache_ttl: Duration,
    /// Interval between order-progressor sweeps.
    pub progress_interval: Duration,
    /// Minimum time an order must sit in a processing state before the
    /// progressor advances it.
    pub progress_dwell: Duration,
    pub inventory_scan_interval: Duration,
    /// Bound applied to storage calls on client-facing paths.
    pub storage_deadline: Duration,
    /// Skip raising an alert when the batch already has an active alert of
    /// the same kind.
    pub alert_dedup: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            rate_limit_requests: parse_var("RATE_LIMIT_REQUESTS", 100)?,
            rate_limit_window: secs_var("RATE_LIMIT_WINDOW_SECS", 60)?,
            catalog_cache_ttl: secs_var("CATALOG_CACHE_TTL_SECS", 300)?,
            customer_orders_cache_ttl: secs_var("ORDERS_CACHE_TTL_SECS", 300)?,
            session_cache_ttl: secs_var("SESSION_CACHE_TTL_SECS", 900)?,
            progress_interval: secs_var("ORDER_PROGRESS_INTERVAL_SECS", 60)?,
            progress_dwell: secs_var("ORDER_PROGRESS_DWELL_SECS", 300)?,
            inventory_scan_interval: secs_var("INVENTORY_SCAN_INTERVAL_SECS", 3600)?,
            storage_deadline: secs_var("STORAGE_DEADLINE_SECS", 5)?,
            alert_dedup: parse_var("ALERT_DEDUP", true)?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parse_var(name, default_secs)?))
}
