//! Publishes one chat exchange onto both of a user's durable queues.

use anyhow::{Context, Result};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use serde::Serialize;

pub fn memory_queue_name(user_id: &str) -> String {
    format!("memory_tasks_user_{user_id}")
}

pub fn log_queue_name(user_id: &str) -> String {
    format!("message_logs_user_{user_id}")
}

#[derive(Debug, Serialize)]
struct QueueTask<'a> {
    user_id: &'a str,
    user_message: &'a str,
    bot_response: &'a str,
}

/// Declares both of a user's queues if they don't yet exist and publishes
/// the exchange to each as a persistent message. Called once per chat turn,
/// right after the response goes back to the caller.
pub async fn publish_to_both_queues(
    channel: &Channel,
    user_id: &str,
    user_message: &str,
    bot_response: &str,
) -> Result<()> {
    let memory_queue = memory_queue_name(user_id);
    let message_queue = log_queue_name(user_id);

    for queue in [&memory_queue, &message_queue] {
        channel
            .queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .with_context(|| format!("declaring queue {queue}"))?;
    }

    let body = serde_json::to_vec(&QueueTask { user_id, user_message, bot_response })
        .context("serializing queue task")?;
    let props = BasicProperties::default().with_delivery_mode(2);

    for queue in [&message_queue, &memory_queue] {
        channel
            .basic_publish("", queue, BasicPublishOptions::default(), &body, props.clone())
            .await
            .with_context(|| format!("publishing to {queue}"))?
            .await
            .with_context(|| format!("awaiting publisher confirm for {queue}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_prefixed_by_family() {
        assert_eq!(memory_queue_name("abc"), "memory_tasks_user_abc");
        assert_eq!(log_queue_name("abc"), "message_logs_user_abc");
    }
}
