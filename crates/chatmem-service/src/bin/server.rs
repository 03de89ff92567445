//! HTTP façade binary: the entry point `main.py`'s FastAPI app corresponds
//! to. Resolves configuration once, connects every adapter, then serves.

use std::sync::Arc;

use anyhow::{Context, Result};
use lapin::{Connection, ConnectionProperties};

use chatmem_config::EngineConfig;
use chatmem_engine::MemoryEngine;
use chatmem_llm::GeminiOracle;
use chatmem_service::{router, AppState};
use chatmem_session::{PgStore, SessionController};
use chatmem_vkc::RedisVkc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = EngineConfig::from_env().context("loading configuration")?;

    let cache = RedisVkc::connect(&config.cache.url()).await.context("connecting to cache")?;
    cache.ensure_indices().await.context("ensuring cache indices")?;
    let cache = Arc::new(cache);

    let oracle = Arc::new(GeminiOracle::new(config.llm.api_key.clone()));
    let engine = MemoryEngine::new(cache.clone(), oracle);

    let store = PgStore::connect(&config.store.database_url).await.context("connecting to relational store")?;
    let session = SessionController::new(store, cache);

    let amqp = Connection::connect(&config.broker.amqp_url, ConnectionProperties::default())
        .await
        .context("connecting to rabbitmq")?;
    let channel = amqp.create_channel().await.context("opening rabbitmq channel")?;

    let state = Arc::new(AppState { engine, session, channel });

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await.context("binding HTTP listener")?;
    tracing::info!(port, "chat service running");

    axum::serve(listener, router(state)).await.context("HTTP server failed")?;
    Ok(())
}
