// Fulfillment worker - runs the background side of the core:
// the order progressor and the inventory scan.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use server_core::kernel::collaborators::{DevAccessControl, PgCatalogService, SandboxPayments};
use server_core::kernel::scheduled_tasks::start_scheduler;
use server_core::kernel::ServerDeps;
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let deps = ServerDeps::postgres(
        config,
        pool.clone(),
        Arc::new(PgCatalogService::new(pool)),
        Arc::new(SandboxPayments::new()),
        Arc::new(DevAccessControl),
    );

    let scheduler = start_scheduler(deps).await?;

    tracing::info!("Fulfillment worker running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down scheduled tasks...");
    let mut scheduler = scheduler;
    scheduler.shutdown().await?;
    Ok(())
}
