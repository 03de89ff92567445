//! The discovery-and-consume loop shared by the memory worker and the log
//! worker. Both poll the management API on the same cadence for queues
//! matching their family's prefix, attach a consumer to every queue they
//! haven't seen yet, and cancel consumers for queues that have disappeared
//! (a user logged out and their queues drained and were cleaned up).
//!
//! A handler never causes a redelivery: whatever it returns, the delivery
//! is acked. Malformed or failing messages are logged and dropped, not
//! retried — a task that can't be processed now won't process later either.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};

use chatmem_config::BrokerConfig;

use crate::management;

pub type MessageHandler =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

pub struct WorkerSpec {
    pub name: &'static str,
    pub queue_prefix: &'static str,
    pub prefetch_count: u16,
    pub poll_interval: Duration,
}

/// Connects once, then polls and consumes forever. Returns only if the
/// initial connection or channel setup fails.
pub async fn run_worker(broker: &BrokerConfig, spec: WorkerSpec, handler: MessageHandler) -> Result<()> {
    tracing::info!(worker = spec.name, "connecting to rabbitmq");
    let conn = Connection::connect(&broker.amqp_url, ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;
    channel.basic_qos(spec.prefetch_count, BasicQosOptions::default()).await?;

    let http = reqwest::Client::new();
    let mut consumers: HashSet<String> = HashSet::new();

    loop {
        match management::list_queues(&http, broker).await {
            Ok(queues) => {
                let matching: Vec<String> = queues
                    .into_iter()
                    .map(|q| q.name)
                    .filter(|n| n.starts_with(spec.queue_prefix))
                    .collect();

                for name in &matching {
                    if consumers.contains(name) {
                        continue;
                    }
                    match start_consumer(&channel, name, handler.clone()).await {
                        Ok(()) => {
                            consumers.insert(name.clone());
                            tracing::info!(worker = spec.name, queue = %name, "now consuming");
                        }
                        Err(e) => {
                            tracing::warn!(worker = spec.name, queue = %name, error = %e, "failed to start consumer");
                        }
                    }
                }

                let active: HashSet<&String> = matching.iter().collect();
                let stale: Vec<String> =
                    consumers.iter().filter(|q| !active.contains(q)).cloned().collect();
                for name in stale {
                    if let Err(e) = channel.basic_cancel(&name, BasicCancelOptions::default()).await {
                        tracing::warn!(worker = spec.name, queue = %name, error = %e, "cancel failed");
                    }
                    consumers.remove(&name);
                    tracing::info!(worker = spec.name, queue = %name, "pruned consumer for expired queue");
                }

                tracing::info!(worker = spec.name, count = consumers.len(), "listening to queues");
            }
            Err(e) => tracing::warn!(worker = spec.name, error = %e, "queue discovery failed"),
        }
        tokio::time::sleep(spec.poll_interval).await;
    }
}

async fn start_consumer(channel: &Channel, queue_name: &str, handler: MessageHandler) -> Result<()> {
    channel
        .queue_declare(queue_name, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
        .await?;
    let mut consumer = channel
        .basic_consume(queue_name, queue_name, BasicConsumeOptions::default(), FieldTable::default())
        .await?;

    let queue_name = queue_name.to_string();
    tokio::spawn(async move {
        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(queue = %queue_name, error = %e, "delivery error");
                    continue;
                }
            };
            if let Err(e) = handler(Bytes::copy_from_slice(&delivery.data)).await {
                tracing::warn!(queue = %queue_name, error = %e, "handler error");
            }
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                tracing::warn!(queue = %queue_name, error = %e, "ack failed");
            }
        }
    });

    Ok(())
}
