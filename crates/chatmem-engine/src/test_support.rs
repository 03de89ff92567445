//! In-memory [`VectorKvCache`] fake used by this crate's own tests so the
//! decision machine and retrieval modes can be exercised without a live
//! Redis instance.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use chatmem_vkc::{ChatRecord, MemoryRecord, Result, RfmMatch, SemanticMatch, VectorKvCache};

#[derive(Default)]
pub struct InMemoryVkc {
    memories: Mutex<HashMap<(String, Uuid), MemoryRecord>>,
    chats: Mutex<HashMap<(String, Uuid), ChatRecord>>,
}

impl InMemoryVkc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorKvCache for InMemoryVkc {
    async fn store_memory(&self, record: &MemoryRecord) -> Result<()> {
        self.memories
            .lock()
            .unwrap()
            .insert((record.user_id.clone(), record.id), record.clone());
        Ok(())
    }

    async fn store_chat(&self, record: &ChatRecord) -> Result<()> {
        self.chats
            .lock()
            .unwrap()
            .insert((record.user_id.clone(), record.id), record.clone());
        Ok(())
    }

    async fn knn(
        &self,
        user_id: &str,
        query_vec: &[f32],
        k: usize,
        cutoff: Option<f32>,
        bump_metadata: bool,
    ) -> Result<Vec<SemanticMatch>> {
        let mut matches: Vec<MemoryRecord> = self
            .memories
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();

        let mut scored: Vec<(f32, MemoryRecord)> = matches
            .drain(..)
            .map(|m| (1.0 - chatmem_rk::cosine(query_vec, &m.embedding), m))
            .filter(|(dist, _)| cutoff.map_or(true, |c| *dist <= c))
            .collect();
        scored.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        scored.truncate(k);

        let now = chrono::Utc::now();
        let mut out = Vec::with_capacity(scored.len());
        for (dist, mut record) in scored {
            if bump_metadata {
                record.frequency += 1;
                record.last_used = now;
                record.rfm_score = chatmem_rk::rfm_score_at(now, record.frequency, record.magnitude, now);
                self.memories
                    .lock()
                    .unwrap()
                    .insert((record.user_id.clone(), record.id), record.clone());
            }
            out.push(SemanticMatch {
                mem_id: record.id,
                text: record.memory_text.clone(),
                sim: dist,
                created_at: record.created_at,
                last_used: record.last_used,
            });
        }
        Ok(out)
    }

    async fn top_by_rfm(&self, user_id: &str, k: usize) -> Result<Vec<RfmMatch>> {
        let mut matches: Vec<MemoryRecord> = self
            .memories
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.rfm_score.total_cmp(&a.rfm_score));
        matches.truncate(k);
        Ok(matches
            .into_iter()
            .map(|m| RfmMatch { mem_id: m.id, text: m.memory_text, rfm_score: m.rfm_score })
            .collect())
    }

    async fn recent_chats(&self, user_id: &str, m: usize) -> Result<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self
            .chats
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        chats.truncate(m);
        chats.reverse();
        Ok(chats)
    }

    async fn get_memory(&self, user_id: &str, mem_id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.memories.lock().unwrap().get(&(user_id.to_string(), mem_id)).cloned())
    }

    async fn all_memories(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        Ok(self.memories.lock().unwrap().values().filter(|m| m.user_id == user_id).cloned().collect())
    }

    async fn all_chats(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        Ok(self.chats.lock().unwrap().values().filter(|c| c.user_id == user_id).cloned().collect())
    }

    async fn purge(&self, user_id: &str) -> Result<()> {
        self.memories.lock().unwrap().retain(|(uid, _), _| uid != user_id);
        self.chats.lock().unwrap().retain(|(uid, _), _| uid != user_id);
        Ok(())
    }
}
