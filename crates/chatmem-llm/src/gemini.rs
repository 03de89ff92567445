use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::{Oracle, EMBEDDING_DIM};

const GENERATE_MODEL: &str = "gemini-2.5-flash";
const EMBED_MODEL: &str = "text-embedding-004";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini-backed [`Oracle`]. Holds a shared [`reqwest::Client`] — safe to
/// clone cheaply and reuse across every coroutine that calls into the
/// oracle, matching the shared-connection resource model the rest of the
/// cache/broker adapters follow.
#[derive(Clone)]
pub struct GeminiOracle {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiOracle {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Builds from the `GOOGLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .context("GOOGLE_API_KEY must be set to use the Gemini oracle")?;
        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{API_BASE}/models/{GENERATE_MODEL}:generateContent?key={}", self.api_key);
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            bail!("Gemini generateContent error ({status}): {body}");
        }

        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .map(str::to_string);

        match text {
            Some(text) => Ok(text),
            None => {
                warn!(%body, "gemini response missing candidate text");
                bail!("Gemini response missing candidate text");
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{API_BASE}/models/{EMBED_MODEL}:embedContent?key={}", self.api_key);
        let payload = json!({
            "model": format!("models/{EMBED_MODEL}"),
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_DOCUMENT",
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            bail!("Gemini embedContent error ({status}): {body}");
        }

        let values = body
            .pointer("/embedding/values")
            .and_then(|v| v.as_array())
            .context("Gemini response missing embedding values")?;

        let embedding: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        if embedding.len() != EMBEDDING_DIM {
            bail!(
                "Gemini returned a {}-dim embedding, expected {EMBEDDING_DIM}",
                embedding.len()
            );
        }

        Ok(embedding)
    }
}
