//! Periodic job that deletes a user's queues once they've drained to zero —
//! the counterpart to queues being created lazily on first publish. Without
//! this, every user who ever chatted leaves two idle queues behind forever.

use std::time::Duration;

use anyhow::Result;

use chatmem_config::BrokerConfig;

use crate::management;

const QUEUE_PREFIXES: [&str; 2] = ["memory_tasks_user_", "message_logs_user_"];

/// Runs forever, sleeping `interval` between passes. A failed pass is
/// logged and retried on the next tick rather than aborting the job.
pub async fn run_cleanup_loop(broker: &BrokerConfig, interval: Duration) -> ! {
    let http = reqwest::Client::new();
    loop {
        if let Err(e) = cleanup_once(&http, broker).await {
            tracing::warn!(error = %e, "queue cleanup pass failed");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn cleanup_once(http: &reqwest::Client, broker: &BrokerConfig) -> Result<()> {
    let queues = management::list_queues(http, broker).await?;
    for queue in queues {
        if !QUEUE_PREFIXES.iter().any(|p| queue.name.starts_with(p)) {
            continue;
        }
        if queue.messages != 0 {
            continue;
        }
        match management::delete_queue(http, broker, &queue).await {
            Ok(true) => tracing::info!(queue = %queue.name, "deleted empty queue"),
            Ok(false) => tracing::warn!(queue = %queue.name, "queue delete returned an unexpected status"),
            Err(e) => tracing::warn!(queue = %queue.name, error = %e, "queue delete failed"),
        }
    }
    tracing::info!("queue cleanup pass completed");
    Ok(())
}
