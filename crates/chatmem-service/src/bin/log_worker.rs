//! Log worker binary: discovers `message_logs_user_*` queues and appends
//! each exchange to the user's chat history.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use chatmem_config::EngineConfig;
use chatmem_engine::MemoryEngine;
use chatmem_llm::GeminiOracle;
use chatmem_pipeline::{log_task_handler, log_worker_spec, run_worker, DEFAULT_POLL_INTERVAL_SECS};
use chatmem_vkc::RedisVkc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = EngineConfig::from_env().context("loading configuration")?;

    let cache = RedisVkc::connect(&config.cache.url()).await.context("connecting to cache")?;
    cache.ensure_indices().await.context("ensuring cache indices")?;
    let cache = Arc::new(cache);
    let oracle = Arc::new(GeminiOracle::new(config.llm.api_key.clone()));
    let engine = MemoryEngine::new(cache, oracle);

    let poll_interval = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS);
    run_worker(&config.broker, log_worker_spec(poll_interval), log_task_handler(engine)).await
}
