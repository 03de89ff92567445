use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use anyhow::Result;

use crate::{Oracle, EMBEDDING_DIM};

/// Deterministic [`Oracle`] for tests and property checks — no network
/// calls, no nondeterminism. `generate` replies from a pre-seeded queue
/// (falling back to a default once exhausted); `embed` returns an exact
/// pre-registered vector when the text matches, or a hash-derived vector
/// otherwise, so identical inputs always produce identical embeddings.
pub struct StubOracle {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
}

impl Default for StubOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl StubOracle {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: "none".to_string(),
            embeddings: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a canned reply; `generate` returns queued replies in FIFO order.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(response.into());
        self
    }

    /// Registers an exact embedding for a given input text, overriding the
    /// deterministic hash fallback — use this to construct semantically
    /// "close" or "far" pairs for retrieval tests.
    pub fn with_embedding(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.embeddings.lock().unwrap().insert(text.into(), vector);
        self
    }
}

/// Deterministic, text-derived pseudo-embedding. Not semantically
/// meaningful — only stable (same text -> same vector) and distinguishing
/// (different text -> different vector with high probability).
fn hash_embedding(text: &str) -> Vec<f32> {
    let mut state: u64 = 1469598103934665603; // FNV offset basis
    for byte in text.bytes() {
        state ^= byte as u64;
        state = state.wrapping_mul(1099511628211); // FNV prime
    }
    (0..EMBEDDING_DIM)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407 + i as u64);
            // Map to [-1.0, 1.0] via the top bits for a decorrelated spread.
            ((state >> 40) as i32 % 1000) as f32 / 1000.0
        })
        .collect()
}

#[async_trait]
impl Oracle for StubOracle {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        let mut queue = self.responses.lock().unwrap();
        Ok(queue.pop_front().unwrap_or_else(|| self.default_response.clone()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vec) = self.embeddings.lock().unwrap().get(text) {
            return Ok(vec.clone());
        }
        Ok(hash_embedding(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_replies_in_fifo_order_then_falls_back() {
        let oracle = StubOracle::new().with_response("add").with_response("merge:1");
        assert_eq!(oracle.generate("x").await.unwrap(), "add");
        assert_eq!(oracle.generate("x").await.unwrap(), "merge:1");
        assert_eq!(oracle.generate("x").await.unwrap(), "none");
    }

    #[tokio::test]
    async fn embed_is_deterministic_for_same_text() {
        let oracle = StubOracle::new();
        let a = oracle.embed("user likes piano").await.unwrap();
        let b = oracle.embed("user likes piano").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn embed_override_takes_precedence() {
        let custom = vec![1.0_f32; EMBEDDING_DIM];
        let oracle = StubOracle::new().with_embedding("piano", custom.clone());
        assert_eq!(oracle.embed("piano").await.unwrap(), custom);
    }
}
