//! LLM oracle: the Memory Engine's only dependency on a concrete model
//! provider.
//!
//! [`Oracle`] is deliberately narrow — `generate` and `embed` — because the
//! decision machine's prompts are built entirely in [`chatmem_engine`] and
//! handed over as plain text. Keeping the trait this thin is what lets
//! [`StubOracle`] drive deterministic property tests without a network call.

mod gemini;
mod stub;

pub use gemini::GeminiOracle;
pub use stub::StubOracle;

use async_trait::async_trait;

/// Embedding dimensionality the engine and cache both assume. Matches
/// Gemini's `text-embedding-004`, which is the oracle implementation this
/// crate ships.
pub const EMBEDDING_DIM: usize = 768;

/// A model provider abstracted down to the two calls the memory tier needs.
///
/// The engine is agnostic to which model answers these — only the
/// embedding dimension is load-bearing, since it sizes the cache's vector
/// index.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Free-form text generation: prompt in, reply text out.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;

    /// Embeds `text` into a fixed-length vector. Implementations must
    /// return exactly [`EMBEDDING_DIM`] floats or the cache layer will
    /// reject the embedding.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}
