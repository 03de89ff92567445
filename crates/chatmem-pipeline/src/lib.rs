//! Work Pipeline: moves memory extraction and chat logging off the request
//! path and onto two durable, per-user RabbitMQ queue families.
//!
//! A chat turn publishes once to both `memory_tasks_user_<id>` and
//! `message_logs_user_<id>` ([`publish_to_both_queues`]). Two independent
//! worker loops ([`run_worker`], configured via [`memory_worker_spec`] and
//! [`log_worker_spec`]) discover those queues as they appear and drain them
//! against a shared [`MemoryEngine`]. A third loop ([`run_cleanup_loop`])
//! deletes queues once they've drained and gone idle.

mod cleanup;
mod management;
mod producer;
mod worker;

pub use cleanup::run_cleanup_loop;
pub use management::QueueInfo;
pub use producer::{log_queue_name, memory_queue_name, publish_to_both_queues};
pub use worker::{run_worker, MessageHandler, WorkerSpec};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use chatmem_engine::MemoryEngine;

pub const MEMORY_QUEUE_PREFIX: &str = "memory_tasks_user_";
pub const LOG_QUEUE_PREFIX: &str = "message_logs_user_";
pub const MEMORY_PREFETCH: u16 = 3;
pub const LOG_PREFETCH: u16 = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

pub fn memory_worker_spec(poll_interval: Duration) -> WorkerSpec {
    WorkerSpec {
        name: "memory-worker",
        queue_prefix: MEMORY_QUEUE_PREFIX,
        prefetch_count: MEMORY_PREFETCH,
        poll_interval,
    }
}

pub fn log_worker_spec(poll_interval: Duration) -> WorkerSpec {
    WorkerSpec {
        name: "log-worker",
        queue_prefix: LOG_QUEUE_PREFIX,
        prefetch_count: LOG_PREFETCH,
        poll_interval,
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueueTaskBody {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    user_message: String,
    #[serde(default)]
    bot_response: String,
}

/// Builds the handler the memory worker hands to [`run_worker`]: extract
/// candidates from the exchange and run the add/merge/override/none
/// decision machine for each.
pub fn memory_task_handler(engine: MemoryEngine) -> MessageHandler {
    Arc::new(move |bytes| {
        let engine = engine.clone();
        Box::pin(async move {
            let task: QueueTaskBody = match serde_json::from_slice(&bytes) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed memory task payload");
                    return Ok(());
                }
            };
            if task.user_id.is_empty() || task.user_message.is_empty() || task.bot_response.is_empty() {
                tracing::warn!(user_id = %task.user_id, "skipping memory task: missing required fields");
                return Ok(());
            }

            match engine.process_exchange(&task.user_id, &task.user_message, &task.bot_response).await {
                Ok(outcomes) => {
                    tracing::info!(user_id = %task.user_id, ?outcomes, "memory task processed");
                }
                Err(e) => {
                    tracing::warn!(user_id = %task.user_id, error = %e, "memory task processing failed");
                }
            }
            Ok(())
        })
    })
}

/// Builds the handler the log worker hands to [`run_worker`]: append the
/// exchange to the user's chat history.
pub fn log_task_handler(engine: MemoryEngine) -> MessageHandler {
    Arc::new(move |bytes| {
        let engine = engine.clone();
        Box::pin(async move {
            let task: QueueTaskBody = match serde_json::from_slice(&bytes) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed log task payload");
                    return Ok(());
                }
            };
            if task.user_id.is_empty() {
                tracing::warn!("skipping log task: missing user_id");
                return Ok(());
            }

            match engine.log_message(&task.user_id, &task.user_message, &task.bot_response).await {
                Ok(()) => tracing::info!(user_id = %task.user_id, "logged message"),
                Err(e) => tracing::warn!(user_id = %task.user_id, error = %e, "log message failed"),
            }
            Ok(())
        })
    })
}
