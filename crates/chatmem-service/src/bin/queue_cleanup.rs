//! Queue cleanup binary: periodically deletes empty, drained per-user
//! queues. `CLEANUP_INTERVAL_SEC` is read directly here (default 60), the
//! same way the original job-specific tuning knob lived only in this one
//! script rather than in the shared configuration surface.

use std::time::Duration;

use anyhow::{Context, Result};

use chatmem_config::EngineConfig;
use chatmem_pipeline::run_cleanup_loop;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = EngineConfig::from_env().context("loading configuration")?;

    let interval_secs: u64 =
        std::env::var("CLEANUP_INTERVAL_SEC").ok().and_then(|v| v.parse().ok()).unwrap_or(60);

    tracing::info!("starting periodic rabbitmq cleanup");
    run_cleanup_loop(&config.broker, Duration::from_secs(interval_secs)).await
}
