use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expected dimensionality of every memory embedding.
///
/// Load-bearing on the index shape: the RediSearch `memories_idx` vector
/// field is created with this dimension, and [`crate::error::VkcError::BadEmbeddingDim`]
/// is raised before a mismatched vector ever reaches Redis.
pub const EMBEDDING_DIM: usize = 768;

/// A single memory fragment, keyed `memories:<user_id>:<id>` in the cache and
/// mirrored to the `persona_category` table at logout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub user_id: String,
    pub memory_text: String,
    pub embedding: Vec<f32>,
    pub magnitude: f32,
    pub frequency: u32,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub rfm_score: f32,
}

impl MemoryRecord {
    /// `true` when every invariant in the data model holds: non-empty text,
    /// a correctly-sized embedding, and numeric fields present. Used by the
    /// session controller to decide which records survive logout.
    pub fn is_valid(&self) -> bool {
        !self.memory_text.trim().is_empty()
            && self.embedding.len() == EMBEDDING_DIM
            && self.magnitude.is_finite()
            && self.frequency >= 1
    }
}

/// A single chat turn, keyed `chat:<user_id>:<id>` in the cache and mirrored
/// to the `chat_message_logs` table at logout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: Uuid,
    pub user_id: String,
    pub user_message: String,
    pub bot_response: String,
    pub timestamp: DateTime<Utc>,
}

/// One hit from a semantic KNN search: the stored memory plus its distance
/// to the query vector and the timestamps needed for prompt annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub mem_id: Uuid,
    pub text: String,
    pub sim: f32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// One hit from an RFM-ranked search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfmMatch {
    pub mem_id: Uuid,
    pub text: String,
    pub rfm_score: f32,
}

pub(crate) fn pack_embedding(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

pub(crate) fn unpack_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrips() {
        let v = vec![0.1_f32, -2.5, 3.0, 0.0];
        let packed = pack_embedding(&v);
        let unpacked = unpack_embedding(&packed);
        assert_eq!(v, unpacked);
    }

    #[test]
    fn valid_memory_requires_correct_embedding_dim() {
        let mut rec = MemoryRecord {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            memory_text: "likes piano".into(),
            embedding: vec![0.0; EMBEDDING_DIM],
            magnitude: 3.0,
            frequency: 1,
            last_used: Utc::now(),
            created_at: Utc::now(),
            rfm_score: 2.5,
        };
        assert!(rec.is_valid());
        rec.embedding.pop();
        assert!(!rec.is_valid());
    }
}
