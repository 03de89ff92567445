//! Session Controller: the bridge between the relational store (source of
//! truth across sessions) and the Vector+KV Cache (source of truth during
//! one). Login populates the cache from the store; logout drains it back.

mod normalize;
mod store;

pub use store::PgStore;

use std::sync::Arc;

use anyhow::{Context, Result};
use chatmem_vkc::{ChatRecord, MemoryRecord, VectorKvCache};
use serde::Serialize;

use normalize::normalize_embedding;

#[derive(Debug, Clone, Serialize)]
pub struct LoginSummary {
    pub memories_loaded: usize,
    pub chats_loaded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutSummary {
    pub memories_synced: usize,
    pub chats_synced: usize,
}

#[derive(Clone)]
pub struct SessionController {
    store: PgStore,
    cache: Arc<dyn VectorKvCache>,
}

impl SessionController {
    pub fn new(store: PgStore, cache: Arc<dyn VectorKvCache>) -> Self {
        Self { store, cache }
    }

    /// Reads the user's rows from the store and loads every one that
    /// parses into the cache. A row that fails to normalize (malformed
    /// embedding, say) is logged and skipped rather than aborting the
    /// whole login — it mirrors the original behavior of reporting the raw
    /// fetched counts regardless of per-row load outcome.
    pub async fn login(&self, user_id: &str) -> Result<LoginSummary> {
        let (memory_rows, chat_rows) =
            tokio::try_join!(self.store.fetch_memories(user_id), self.store.fetch_chats(user_id))?;

        let memories_loaded = memory_rows.len();
        let chats_loaded = chat_rows.len();

        for row in memory_rows {
            let embedding = match normalize_embedding(&row.embedding) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(user_id, mem_id = %row.id, error = %e, "skipping memory with unreadable embedding");
                    continue;
                }
            };
            let record = MemoryRecord {
                id: row.id,
                user_id: row.user_id,
                memory_text: row.memory_text,
                embedding,
                magnitude: row.magnitude as f32,
                frequency: row.frequency.max(0) as u32,
                last_used: row.last_used,
                created_at: row.created_at,
                rfm_score: row.rfm_score as f32,
            };
            if let Err(e) = self.cache.store_memory(&record).await {
                tracing::warn!(user_id, mem_id = %record.id, error = %e, "failed to load memory into cache");
            }
        }

        for row in chat_rows {
            let record = ChatRecord {
                id: row.id,
                user_id: row.user_id,
                user_message: row.user_message,
                bot_response: row.bot_response,
                timestamp: row.timestamp,
            };
            if let Err(e) = self.cache.store_chat(&record).await {
                tracing::warn!(user_id, chat_id = %record.id, error = %e, "failed to load chat into cache");
            }
        }

        tracing::info!(user_id, memories_loaded, chats_loaded, "session loaded");
        Ok(LoginSummary { memories_loaded, chats_loaded })
    }

    /// Drains the user's cache namespace back to the store: validates
    /// every memory (dropping those that fail, likely written mid-turn and
    /// never completed), bulk-upserts everything that survives, then purges
    /// the cache namespace entirely.
    pub async fn logout(&self, user_id: &str) -> Result<LogoutSummary> {
        let (memories, chats) =
            tokio::try_join!(self.cache.all_memories(user_id), self.cache.all_chats(user_id))
                .context("reading cache contents at logout")?;

        let valid_memories: Vec<MemoryRecord> = memories.into_iter().filter(|m| m.is_valid()).collect();

        if !valid_memories.is_empty() {
            self.store.upsert_memories(&valid_memories).await?;
        }
        if !chats.is_empty() {
            self.store.upsert_chats(&chats).await?;
        }

        self.cache.purge(user_id).await.context("purging cache namespace at logout")?;

        let summary = LogoutSummary { memories_synced: valid_memories.len(), chats_synced: chats.len() };
        tracing::info!(user_id, memories_synced = summary.memories_synced, chats_synced = summary.chats_synced, "session synced");
        Ok(summary)
    }
}
