//! The relational side of a session sync: `persona_category` (memories) and
//! `chat_message_logs` (chats), read at login and bulk-upserted at logout.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use chatmem_vkc::{ChatRecord, MemoryRecord};

const BATCH_SIZE: usize = 100;

#[derive(Debug, sqlx::FromRow)]
pub struct MemoryRow {
    pub id: Uuid,
    pub user_id: String,
    pub memory_text: String,
    pub embedding: Value,
    pub magnitude: f64,
    pub frequency: i32,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub rfm_score: f64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ChatRow {
    pub id: Uuid,
    pub user_id: String,
    pub user_message: String,
    pub bot_response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connecting to the relational store")?;
        Ok(Self { pool })
    }

    pub async fn fetch_memories(&self, user_id: &str) -> Result<Vec<MemoryRow>> {
        sqlx::query_as::<_, MemoryRow>(
            "SELECT id, user_id, memory_text, embedding, magnitude, frequency, last_used, created_at, rfm_score \
             FROM persona_category WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching memories from persona_category")
    }

    pub async fn fetch_chats(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        sqlx::query_as::<_, ChatRow>(
            "SELECT id, user_id, user_message, bot_response, timestamp \
             FROM chat_message_logs WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching chats from chat_message_logs")
    }

    /// Bulk-upserts in batches of 100 — one multi-row `INSERT ... ON
    /// CONFLICT` statement per batch rather than one round trip per record.
    pub async fn upsert_memories(&self, records: &[MemoryRecord]) -> Result<()> {
        for batch in records.chunks(BATCH_SIZE) {
            let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO persona_category \
                 (id, user_id, memory_text, embedding, magnitude, frequency, last_used, created_at, rfm_score) ",
            );
            qb.push_values(batch, |mut b, rec| {
                b.push_bind(rec.id)
                    .push_bind(&rec.user_id)
                    .push_bind(&rec.memory_text)
                    .push_bind(serde_json::json!(rec.embedding))
                    .push_bind(rec.magnitude as f64)
                    .push_bind(rec.frequency as i32)
                    .push_bind(rec.last_used)
                    .push_bind(rec.created_at)
                    .push_bind(rec.rfm_score as f64);
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET \
                  memory_text = EXCLUDED.memory_text, \
                  embedding = EXCLUDED.embedding, \
                  magnitude = EXCLUDED.magnitude, \
                  frequency = EXCLUDED.frequency, \
                  last_used = EXCLUDED.last_used, \
                  rfm_score = EXCLUDED.rfm_score",
            );
            qb.build().execute(&self.pool).await.context("upserting a batch of memories")?;
        }
        Ok(())
    }

    pub async fn upsert_chats(&self, records: &[ChatRecord]) -> Result<()> {
        for batch in records.chunks(BATCH_SIZE) {
            let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO chat_message_logs (id, user_id, user_message, bot_response, timestamp) ",
            );
            qb.push_values(batch, |mut b, rec| {
                b.push_bind(rec.id)
                    .push_bind(&rec.user_id)
                    .push_bind(&rec.user_message)
                    .push_bind(&rec.bot_response)
                    .push_bind(rec.timestamp);
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET \
                  user_message = EXCLUDED.user_message, \
                  bot_response = EXCLUDED.bot_response, \
                  timestamp = EXCLUDED.timestamp",
            );
            qb.build().execute(&self.pool).await.context("upserting a batch of chats")?;
        }
        Ok(())
    }
}
