//! Thin client for the RabbitMQ HTTP management API. Used for the two things
//! the AMQP protocol itself has no notion of: listing every queue on the
//! broker (for dynamic per-user discovery) and deleting a queue by name.

use anyhow::{Context, Result};
use serde::Deserialize;

use chatmem_config::BrokerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub vhost: String,
    #[serde(default)]
    pub messages: u64,
}

pub async fn list_queues(http: &reqwest::Client, broker: &BrokerConfig) -> Result<Vec<QueueInfo>> {
    let url = format!("{}/queues", broker.management_url);
    let resp = http
        .get(&url)
        .basic_auth(&broker.management_user, Some(&broker.management_password))
        .send()
        .await
        .context("rabbitmq management API request failed")?
        .error_for_status()
        .context("rabbitmq management API returned an error status")?;
    resp.json().await.context("rabbitmq management API returned malformed JSON")
}

/// Deletes a queue, returning whether the broker actually removed it (204).
pub async fn delete_queue(http: &reqwest::Client, broker: &BrokerConfig, queue: &QueueInfo) -> Result<bool> {
    let vhost = queue.vhost.replace('/', "%2F");
    let url = format!("{}/queues/{}/{}", broker.management_url, vhost, queue.name);
    let resp = http
        .delete(&url)
        .basic_auth(&broker.management_user, Some(&broker.management_password))
        .send()
        .await
        .context("rabbitmq management API delete request failed")?;
    Ok(resp.status().as_u16() == 204)
}
