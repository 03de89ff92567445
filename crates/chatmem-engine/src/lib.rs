//! Memory Engine: the retrieval and write-decision logic that sits between
//! the cache adapter and the LLM oracle.
//!
//! [`MemoryEngine`] is a thin composition wrapper — all the actual logic
//! lives in [`retrieval`] (the three chat-* modes) and [`write_path`] (the
//! add/merge/override/none decision machine) as free functions taking
//! `&dyn VectorKvCache` / `&dyn Oracle`, so either module can be tested
//! directly against the fakes in [`test_support`] without constructing a
//! full engine.

mod retrieval;
#[cfg(test)]
mod test_support;
mod write_path;

pub use retrieval::{chat_rfm, chat_rfm_semantic, chat_semantic, ChatResponse, MemoriesRetrieved};
pub use write_path::{generate_candidates, log_message, process_exchange, update_user_memory, WriteOutcome};

use std::sync::Arc;

use anyhow::Result;
use chatmem_llm::Oracle;
use chatmem_vkc::VectorKvCache;

/// Composes a cache adapter and an oracle behind the three retrieval modes
/// and the write path. Cheap to clone — both fields are `Arc`s — so one
/// engine instance is shared across every HTTP request and queue consumer
/// in a process.
#[derive(Clone)]
pub struct MemoryEngine {
    cache: Arc<dyn VectorKvCache>,
    oracle: Arc<dyn Oracle>,
}

impl MemoryEngine {
    pub fn new(cache: Arc<dyn VectorKvCache>, oracle: Arc<dyn Oracle>) -> Self {
        Self { cache, oracle }
    }

    pub async fn chat_semantic(&self, user_id: &str, user_input: &str) -> Result<ChatResponse> {
        retrieval::chat_semantic(self.cache.as_ref(), self.oracle.as_ref(), user_id, user_input).await
    }

    pub async fn chat_rfm(&self, user_id: &str, user_input: &str) -> Result<ChatResponse> {
        retrieval::chat_rfm(self.cache.as_ref(), self.oracle.as_ref(), user_id, user_input).await
    }

    pub async fn chat_rfm_semantic(&self, user_id: &str, user_input: &str) -> Result<ChatResponse> {
        retrieval::chat_rfm_semantic(self.cache.as_ref(), self.oracle.as_ref(), user_id, user_input).await
    }

    /// Runs the full write path for one exchange: extract candidates, then
    /// decide and apply each sequentially.
    pub async fn process_exchange(&self, user_id: &str, user_msg: &str, bot_resp: &str) -> Result<Vec<WriteOutcome>> {
        write_path::process_exchange(self.cache.as_ref(), self.oracle.as_ref(), user_id, user_msg, bot_resp).await
    }

    pub async fn log_message(&self, user_id: &str, user_message: &str, bot_response: &str) -> Result<()> {
        write_path::log_message(self.cache.as_ref(), user_id, user_message, bot_response).await
    }
}
