//! Vector+KV Cache adapter (VKC).
//!
//! The single source of truth during a session: a process-external
//! key/value+vector store (Redis + RediSearch) holding per-user memory and
//! chat hashes. [`VectorKvCache`] is the trait the Memory Engine programs
//! against; [`RedisVkc`] is the production implementation.
//!
//! Every operation is scoped to one `user_id` partition — no method here
//! reads or writes across users, matching the data model's partitioning
//! invariant.

mod error;
mod redis_vkc;
mod schema;

pub use error::{Result, VkcError};
pub use redis_vkc::RedisVkc;
pub use schema::{ChatRecord, MemoryRecord, RfmMatch, SemanticMatch, EMBEDDING_DIM};

use async_trait::async_trait;

/// The cache adapter's full surface, as used by the Memory Engine and the
/// Session Controller. Kept as a trait so tests can swap in an in-memory
/// fake without a live Redis instance.
#[async_trait]
pub trait VectorKvCache: Send + Sync {
    /// Upsert a memory hash. The embedding is packed to binary float32
    /// internally; callers always deal in `Vec<f32>`.
    async fn store_memory(&self, record: &MemoryRecord) -> Result<()>;

    /// Upsert a chat hash.
    async fn store_chat(&self, record: &ChatRecord) -> Result<()>;

    /// KNN over the memory index filtered to `user_id`, ascending distance
    /// (smaller = more similar). `cutoff`, if set, drops results with a
    /// distance greater than the cutoff. When `bump_metadata` is `true` each
    /// returned record's `frequency`/`last_used`/`rfm_score` are updated
    /// in-place as part of this call, atomically from the caller's view.
    async fn knn(
        &self,
        user_id: &str,
        query_vec: &[f32],
        k: usize,
        cutoff: Option<f32>,
        bump_metadata: bool,
    ) -> Result<Vec<SemanticMatch>>;

    /// Top-`k` memories by `rfm_score` descending. Read-only: no metadata bump.
    async fn top_by_rfm(&self, user_id: &str, k: usize) -> Result<Vec<RfmMatch>>;

    /// Last `m` chat records for `user_id`, returned in chronological order
    /// (the adapter sorts by timestamp descending internally, then reverses
    /// before returning so callers always see oldest-first).
    async fn recent_chats(&self, user_id: &str, m: usize) -> Result<Vec<ChatRecord>>;

    /// Single memory lookup by id, used by the write path to read the
    /// current state of a `merge`/`override` target before mutating it.
    async fn get_memory(&self, user_id: &str, mem_id: uuid::Uuid) -> Result<Option<MemoryRecord>>;

    /// All memories for `user_id`, unordered. Used at logout.
    async fn all_memories(&self, user_id: &str) -> Result<Vec<MemoryRecord>>;

    /// All chats for `user_id`, unordered. Used at logout.
    async fn all_chats(&self, user_id: &str) -> Result<Vec<ChatRecord>>;

    /// Drop every key in the user's namespace. Called once, at the end of
    /// logout, after the store bulk-upsert has completed.
    async fn purge(&self, user_id: &str) -> Result<()>;
}
