//! The three retrieval modes: semantic, RFM, and combined. Each assembles a
//! fixed, labeled prompt from concurrently fetched context and returns it
//! through the oracle, reporting timing fields alongside the answer.

use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use chatmem_llm::Oracle;
use chatmem_rk::time_ago_human;
use chatmem_vkc::{ChatRecord, RfmMatch, SemanticMatch, VectorKvCache};

const SEMANTIC_K: usize = 3;
const RFM_K: usize = 3;
const RECENT_CHATS_M: usize = 10;
const COMBINED_CUTOFF: f32 = 0.4;

/// What memories fed into the prompt, rendered the same way they were
/// shown to the oracle — kept as text blocks rather than structured lists
/// since that is what the HTTP response reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoriesRetrieved {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfm: Option<String>,
}

/// The Memory Engine's retrieval response. Timing fields are observability,
/// not semantic output — they exist so operators can see where a slow turn
/// spent its time.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub fetch_time: f64,
    pub response_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_time: Option<f64>,
    pub memories_retrieved: MemoriesRetrieved,
}

fn format_history_block(chats: &[ChatRecord]) -> String {
    chats
        .iter()
        .map(|c| format!("Timestamp: {}\nUser: {}\nBot: {}", c.timestamp.to_rfc3339(), c.user_message, c.bot_response))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_semantic_block(matches: &[SemanticMatch]) -> String {
    matches
        .iter()
        .map(|m| {
            format!(
                "{} | Similarity score: {:.4} | Temporal relevance: added {}, last retrieved {}",
                m.text,
                m.sim,
                time_ago_human(m.created_at),
                time_ago_human(m.last_used),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_rfm_block(matches: &[RfmMatch]) -> String {
    if matches.is_empty() {
        return "No high-RFM memories available.".to_string();
    }
    matches
        .iter()
        .map(|m| format!("{} | RFM score: {:.2}", m.text, m.rfm_score))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Retrieves by pure semantic similarity to the current input. Default
/// `k=3`, no distance cutoff — every nearest neighbor is shown regardless
/// of how distant it is, letting the oracle judge relevance itself.
pub async fn chat_semantic(
    cache: &dyn VectorKvCache,
    oracle: &dyn Oracle,
    user_id: &str,
    user_input: &str,
) -> Result<ChatResponse> {
    let embed_start = Instant::now();
    let input_embedding = oracle.embed(user_input).await.context("embedding user input failed")?;
    let embedding_time = embed_start.elapsed().as_secs_f64();

    let fetch_start = Instant::now();
    let (recent, semantic) = tokio::try_join!(
        cache.recent_chats(user_id, RECENT_CHATS_M),
        cache.knn(user_id, &input_embedding, SEMANTIC_K, None, true),
    )?;
    let fetch_time = fetch_start.elapsed().as_secs_f64();

    let semantic_block = format_semantic_block(&semantic);
    let history_block = format_history_block(&recent);

    let prompt = format!(
        "You are an engaging, friendly, and attentive conversational assistant. Provide helpful, \
         specific, context-aware responses that feel natural and human.\n\n\
         Your personality: curious, empathetic, and adaptive. Match the user's tone and energy.\n\n\
         Instructions:\n\
         - Reference relevant memories if helpful to personalize your response.\n\
         - Build on the ongoing conversation, referencing previous messages.\n\
         - Avoid generic or repetitive answers; be specific and vivid.\n\
         - Respond in a warm, conversational tone. Do not mention that you are an AI.\n\n\
         Recent Chat:\n{history_block}\n\n\
         Semantically Relevant Memories:\n{semantic_block}\n\n\
         Current User Input:\n{user_input}\n\n\
         Respond to the user now."
    );

    let response_start = Instant::now();
    let response = oracle.generate(&prompt).await.context("answer generation failed")?;
    let response_time = response_start.elapsed().as_secs_f64();

    Ok(ChatResponse {
        response: response.trim().to_string(),
        fetch_time,
        response_time,
        embedding_time: Some(embedding_time),
        memories_retrieved: MemoriesRetrieved { semantic: Some(semantic_block), rfm: None },
    })
}

/// Retrieves by RFM ranking only — no embedding call, no KNN, no metadata
/// side effects.
pub async fn chat_rfm(
    cache: &dyn VectorKvCache,
    oracle: &dyn Oracle,
    user_id: &str,
    user_input: &str,
) -> Result<ChatResponse> {
    let fetch_start = Instant::now();
    let (recent, rfm) = tokio::try_join!(
        cache.recent_chats(user_id, RECENT_CHATS_M),
        cache.top_by_rfm(user_id, RFM_K),
    )?;
    let fetch_time = fetch_start.elapsed().as_secs_f64();

    let rfm_block = format_rfm_block(&rfm);
    let history_block = format_history_block(&recent);

    let prompt = format!(
        "You are an engaging, helpful assistant with a strong memory for what matters most to the \
         user. Your responses should be context-aware, specific, and feel genuinely conversational.\n\n\
         Your personality: friendly, supportive, and attentive to details the user cares about.\n\n\
         Instructions:\n\
         - Use high-RFM memories to ground your response in the user's top interests, needs, or concerns.\n\
         - Reference recent chat to maintain flow and context.\n\
         - Be specific and personalize your reply.\n\
         - Maintain a warm, conversational tone. Do not mention that you are an AI.\n\n\
         Recent Chat:\n{history_block}\n\n\
         Important Memories (ranked by RFM):\n{rfm_block}\n\n\
         Current User Input:\n{user_input}\n\n\
         Respond to the user now."
    );

    let response_start = Instant::now();
    let response = oracle.generate(&prompt).await.context("answer generation failed")?;
    let response_time = response_start.elapsed().as_secs_f64();

    Ok(ChatResponse {
        response: response.trim().to_string(),
        fetch_time,
        response_time,
        embedding_time: None,
        memories_retrieved: MemoriesRetrieved { semantic: None, rfm: Some(rfm_block) },
    })
}

/// Fires recent chat, top-RFM, and semantic KNN fetches concurrently and
/// labels all three blocks in the prompt. Semantic retrieval here uses the
/// combined-mode cutoff (0.4, keep similar-or-better) rather than the
/// uncapped pure-semantic cutoff.
pub async fn chat_rfm_semantic(
    cache: &dyn VectorKvCache,
    oracle: &dyn Oracle,
    user_id: &str,
    user_input: &str,
) -> Result<ChatResponse> {
    let embed_start = Instant::now();
    let input_embedding = oracle.embed(user_input).await.context("embedding user input failed")?;
    let embedding_time = embed_start.elapsed().as_secs_f64();

    let fetch_start = Instant::now();
    let (recent, rfm, semantic) = tokio::try_join!(
        cache.recent_chats(user_id, RECENT_CHATS_M),
        cache.top_by_rfm(user_id, RFM_K),
        cache.knn(user_id, &input_embedding, SEMANTIC_K, Some(COMBINED_CUTOFF), true),
    )?;
    let fetch_time = fetch_start.elapsed().as_secs_f64();

    let rfm_block = format_rfm_block(&rfm);
    let semantic_block = format_semantic_block(&semantic);
    let history_block = format_history_block(&recent);

    let prompt = format!(
        "You are an engaging, friendly, and attentive conversational assistant. Provide helpful, \
         specific, context-aware responses that feel natural and human.\n\n\
         Your personality: curious, empathetic, and adaptive.\n\n\
         Instructions:\n\
         - Reference relevant memories if helpful to personalize your response.\n\
         - Use high-RFM memories to understand what matters most to the user.\n\
         - Build on the ongoing conversation.\n\
         - Respond in a warm, conversational tone. Do not mention that you are an AI.\n\n\
         Recent Chat:\n{history_block}\n\n\
         Semantically Relevant Memories:\n{semantic_block}\n\n\
         Important Memories (ranked by Recency, Frequency, Magnitude score):\n{rfm_block}\n\n\
         Current User Input:\n{user_input}\n\n\
         Respond to the user now."
    );

    let response_start = Instant::now();
    let response = oracle.generate(&prompt).await.context("answer generation failed")?;
    let response_time = response_start.elapsed().as_secs_f64();

    Ok(ChatResponse {
        response: response.trim().to_string(),
        fetch_time,
        response_time,
        embedding_time: Some(embedding_time),
        memories_retrieved: MemoriesRetrieved { semantic: Some(semantic_block), rfm: Some(rfm_block) },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryVkc;
    use chatmem_llm::StubOracle;
    use chatmem_vkc::{MemoryRecord, EMBEDDING_DIM};
    use chrono::Utc;
    use uuid::Uuid;

    async fn seed_memory(cache: &InMemoryVkc, user_id: &str, text: &str, magnitude: f32, embedding: Vec<f32>) {
        let now = Utc::now();
        cache
            .store_memory(&MemoryRecord {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                memory_text: text.to_string(),
                embedding,
                magnitude,
                frequency: 1,
                last_used: now,
                created_at: now,
                rfm_score: chatmem_rk::rfm_score_at(now, 1, magnitude, now),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn semantic_mode_bumps_frequency() {
        let cache = InMemoryVkc::new();
        let query = vec![1.0; EMBEDDING_DIM];
        seed_memory(&cache, "u1", "User is learning piano.", 3.0, query.clone()).await;

        let oracle = StubOracle::new().with_embedding("I love piano", query).with_response("Nice!");
        let resp = chat_semantic(&cache, &oracle, "u1", "I love piano").await.unwrap();

        assert_eq!(resp.response, "Nice!");
        assert!(resp.memories_retrieved.semantic.unwrap().contains("piano"));
        assert!(resp.memories_retrieved.rfm.is_none());
        let stored = cache.all_memories("u1").await.unwrap();
        assert_eq!(stored[0].frequency, 2);
    }

    #[tokio::test]
    async fn rfm_mode_orders_by_score_and_has_no_embedding_time() {
        let cache = InMemoryVkc::new();
        seed_memory(&cache, "u1", "High importance.", 5.0, vec![0.0; EMBEDDING_DIM]).await;
        seed_memory(&cache, "u1", "Low importance.", 1.0, vec![0.0; EMBEDDING_DIM]).await;

        let oracle = StubOracle::new().with_response("ok");
        let resp = chat_rfm(&cache, &oracle, "u1", "hi").await.unwrap();

        assert!(resp.embedding_time.is_none());
        let rfm_text = resp.memories_retrieved.rfm.unwrap();
        assert!(rfm_text.find("High importance").unwrap() < rfm_text.find("Low importance").unwrap());
    }

    #[tokio::test]
    async fn combined_mode_reports_both_blocks() {
        let cache = InMemoryVkc::new();
        let query = vec![1.0; EMBEDDING_DIM];
        seed_memory(&cache, "u1", "User plays piano.", 4.0, query.clone()).await;

        let oracle = StubOracle::new().with_embedding("piano again", query).with_response("Sure!");
        let resp = chat_rfm_semantic(&cache, &oracle, "u1", "piano again").await.unwrap();

        assert!(resp.memories_retrieved.semantic.is_some());
        assert!(resp.memories_retrieved.rfm.is_some());
        assert!(resp.embedding_time.is_some());
    }
}
