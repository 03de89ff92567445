//! The write-path decision machine: extract candidate memories from one
//! exchange, decide how each reconciles against existing memories, and
//! apply the decision.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use chatmem_llm::Oracle;
use chatmem_vkc::{MemoryRecord, VectorKvCache};

const DECISION_K: usize = 3;

/// What happened to the candidate at Step C. Carries the affected `mem_id`s
/// so callers (tests, logging) can assert on them without re-reading the
/// cache.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Added { mem_id: Uuid },
    Merged { mem_ids: Vec<Uuid> },
    Overridden { mem_ids: Vec<Uuid> },
    NoOp,
}

/// Step A. Asks the oracle for 0–2 new candidate memory sentences drawn
/// only from the current exchange. A bare "none" (any case) or an empty
/// reply yields zero candidates.
pub async fn generate_candidates(
    oracle: &dyn Oracle,
    user_msg: &str,
    bot_resp: &str,
) -> Result<Vec<String>> {
    let prompt = format!(
        "You are a Memory Extraction Engine.\n\n\
         TASK: identify 0-2 new user memories found only in the exchange below.\n\n\
         RULES\n\
         - Start each memory with \"- \".\n\
         - Around 15 words per memory, third-person, about the user.\n\
         - Include specific nouns, verbs, and context words from the user's message for better retrieval later.\n\
         - If nothing new, output a single line: - None\n\n\
         CURRENT EXCHANGE:\n\
         User: {user_msg}\n\
         Bot: {bot_resp}\n\n\
         EXAMPLE OUTPUT\n\
         - Memory one.\n\
         - Memory two.\n\n\
         OUTPUT:"
    );

    let text = oracle.generate(&prompt).await.context("candidate extraction failed")?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("- none") {
        return Ok(Vec::new());
    }

    Ok(trimmed
        .lines()
        .map(|line| line.trim().trim_start_matches('-').trim().to_string())
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("none"))
        .collect())
}

/// Step B3's importance rating, asked of the oracle at `add`/`merge`/
/// `override` time. Not part of the Ranking Kernel because it needs the
/// oracle — RK stays pure.
async fn assess_magnitude(oracle: &dyn Oracle, text: &str) -> f32 {
    let prompt = format!(
        "You are an expert assistant evaluating how important or urgent a given user prompt is.\n\n\
         Rate the importance of the following prompt on a scale from 0 (not important) to 5 (very important).\n\
         Focus on the user's point of view. Messages that are personal, emotionally significant, or reveal \
         preferences, goals, or values should score higher; casual or non-personal messages should score lower.\n\n\
         Prompt: \"{text}\"\n\n\
         Only output a single number between 0 and 5."
    );

    match oracle.generate(&prompt).await {
        Ok(reply) => reply
            .trim()
            .parse::<f32>()
            .map(|m| (m.clamp(0.0, 5.0) * 100.0).round() / 100.0)
            .unwrap_or(0.0),
        Err(err) => {
            warn!(%err, "magnitude assessment failed, defaulting to 0.0");
            0.0
        }
    }
}

/// Consolidates an existing memory and a new candidate into one merged
/// sentence, per the oracle's judgment.
async fn consolidate(oracle: &dyn Oracle, existing_text: &str, candidate: &str) -> Result<String> {
    let prompt = format!(
        "You are a Memory Consolidation Agent. Merge a related existing memory and a new memory \
         candidate into ONE concise, information-rich memory (max 20 words, 2 sentences).\n\n\
         Existing memory: {existing_text}\n\
         New memory candidate: {candidate}\n\n\
         The merged memory must include all important keywords from both the original memory and the \
         candidate — do not omit any key terms, names, or topics.\n\n\
         Merged memory:"
    );
    oracle.generate(&prompt).await.map(|s| s.trim().to_string()).context("consolidation failed")
}

fn parse_indices(rest: &str, alias: &HashMap<usize, Uuid>) -> Vec<Uuid> {
    rest.split(',')
        .filter_map(|s| s.trim().parse::<usize>().ok())
        .filter_map(|idx| alias.get(&idx).copied())
        .collect()
}

/// Step B + C for a single candidate: embeds it, reads up to
/// [`DECISION_K`] similar existing memories (without bumping their
/// metadata — decision reads must not mutate), asks the oracle to decide,
/// then applies that decision.
pub async fn update_user_memory(
    cache: &dyn VectorKvCache,
    oracle: &dyn Oracle,
    user_id: &str,
    candidate: &str,
) -> Result<WriteOutcome> {
    let now = Utc::now();
    let candidate_embedding = oracle.embed(candidate).await.context("candidate embedding failed")?;
    let sims = cache
        .knn(user_id, &candidate_embedding, DECISION_K, None, false)
        .await
        .context("decision-read KNN failed")?;

    let alias: HashMap<usize, Uuid> = sims
        .iter()
        .enumerate()
        .map(|(i, m)| (i + 1, m.mem_id))
        .collect();

    let similar_block = sims
        .iter()
        .enumerate()
        .map(|(i, m)| format!("Index: {} | Text: {} | Similarity: {}", i + 1, m.text, m.sim))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You are a Memory Manager for a chatbot service. Decide how to integrate a new candidate memory \
         into the chatbot's existing memories, based solely on content, meaning, and similarity scores.\n\n\
         Candidate memory: \"{candidate}\"\n\n\
         Existing semantically similar memories (up to {DECISION_K}):\n{similar_block}\n\n\
         DECISION RULES:\n\
         1. OVERRIDE if it fully duplicates or directly contradicts an existing memory.\n\
         2. MERGE only if it adds new, non-redundant information to an existing memory.\n\
         3. ADD if it is a genuinely new fact not present in any existing memory, or there are no similar memories.\n\
         4. NONE if it is redundant or not useful.\n\n\
         Output exactly one of: add, merge:<indices>, override:<indices>, none. No extra text."
    );

    let decision = oracle.generate(&prompt).await.context("decision call failed")?;
    let decision = decision.trim().to_lowercase();

    if decision == "add" {
        let magnitude = assess_magnitude(oracle, candidate).await;
        let rfm = chatmem_rk::rfm_score_at(now, 1, magnitude, now);
        let mem_id = Uuid::new_v4();
        cache
            .store_memory(&MemoryRecord {
                id: mem_id,
                user_id: user_id.to_string(),
                memory_text: candidate.to_string(),
                embedding: candidate_embedding,
                magnitude,
                frequency: 1,
                last_used: now,
                created_at: now,
                rfm_score: rfm,
            })
            .await
            .context("storing added memory failed")?;
        info!(%mem_id, "memory added");
        return Ok(WriteOutcome::Added { mem_id });
    }

    if let Some(rest) = decision.strip_prefix("merge:") {
        let targets = parse_indices(rest, &alias);
        let mut merged_ids = Vec::with_capacity(targets.len());
        for mem_id in targets {
            let Some(existing) = cache.get_memory(user_id, mem_id).await? else {
                warn!(%mem_id, "merge target vanished, skipping");
                continue;
            };
            let merged_text = consolidate(oracle, &existing.memory_text, candidate).await?;
            let merged_embedding = oracle.embed(&merged_text).await.context("merged embedding failed")?;
            let magnitude = assess_magnitude(oracle, &merged_text).await;
            let frequency = existing.frequency + 1;
            let rfm = chatmem_rk::rfm_score_at(now, frequency, magnitude, now);
            cache
                .store_memory(&MemoryRecord {
                    id: existing.id,
                    user_id: user_id.to_string(),
                    memory_text: merged_text,
                    embedding: merged_embedding,
                    magnitude,
                    frequency,
                    last_used: now,
                    created_at: existing.created_at,
                    rfm_score: rfm,
                })
                .await
                .context("storing merged memory failed")?;
            merged_ids.push(mem_id);
        }
        info!(count = merged_ids.len(), "memories merged");
        return Ok(WriteOutcome::Merged { mem_ids: merged_ids });
    }

    if let Some(rest) = decision.strip_prefix("override:") {
        let targets = parse_indices(rest, &alias);
        let mut overridden_ids = Vec::with_capacity(targets.len());
        for mem_id in targets {
            let Some(existing) = cache.get_memory(user_id, mem_id).await? else {
                warn!(%mem_id, "override target vanished, skipping");
                continue;
            };
            let magnitude = assess_magnitude(oracle, candidate).await;
            let frequency = existing.frequency + 1;
            let rfm = chatmem_rk::rfm_score_at(now, frequency, magnitude, now);
            cache
                .store_memory(&MemoryRecord {
                    id: existing.id,
                    user_id: user_id.to_string(),
                    memory_text: candidate.to_string(),
                    embedding: candidate_embedding.clone(),
                    magnitude,
                    frequency,
                    last_used: now,
                    created_at: existing.created_at,
                    rfm_score: rfm,
                })
                .await
                .context("storing overridden memory failed")?;
            overridden_ids.push(mem_id);
        }
        info!(count = overridden_ids.len(), "memories overridden");
        return Ok(WriteOutcome::Overridden { mem_ids: overridden_ids });
    }

    info!(%decision, "no memory update");
    Ok(WriteOutcome::NoOp)
}

/// Runs the full write path for one `(user_msg, bot_resp)` exchange:
/// extract candidates, then decide+apply each one sequentially so later
/// candidates in the same exchange see earlier writes.
pub async fn process_exchange(
    cache: &dyn VectorKvCache,
    oracle: &dyn Oracle,
    user_id: &str,
    user_msg: &str,
    bot_resp: &str,
) -> Result<Vec<WriteOutcome>> {
    let candidates = generate_candidates(oracle, user_msg, bot_resp).await?;
    let mut outcomes = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        outcomes.push(update_user_memory(cache, oracle, user_id, &candidate).await?);
    }
    Ok(outcomes)
}

/// Appends one chat turn to the user's rolling chat log. Called by the log
/// worker for every exchange, independent of whether it produced a memory.
pub async fn log_message(
    cache: &dyn VectorKvCache,
    user_id: &str,
    user_message: &str,
    bot_response: &str,
) -> Result<()> {
    cache
        .store_chat(&chatmem_vkc::ChatRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            user_message: user_message.to_string(),
            bot_response: bot_response.to_string(),
            timestamp: Utc::now(),
        })
        .await
        .context("storing chat log failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryVkc;
    use chatmem_llm::StubOracle;

    #[tokio::test]
    async fn extraction_parses_bullet_lines() {
        let oracle = StubOracle::new().with_response("- User just started learning piano.\n- User lives in Lyon.");
        let candidates = generate_candidates(&oracle, "I just started piano lessons in Lyon", "Nice!")
            .await
            .unwrap();
        assert_eq!(candidates, vec!["User just started learning piano.", "User lives in Lyon."]);
    }

    #[tokio::test]
    async fn extraction_none_yields_empty() {
        let oracle = StubOracle::new().with_response("- None");
        let candidates = generate_candidates(&oracle, "hey", "hi").await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn add_decision_creates_one_new_memory() {
        let cache = InMemoryVkc::new();
        let oracle = StubOracle::new().with_response("add").with_response("3");
        let before = cache.all_memories("u1").await.unwrap().len();
        let outcome = update_user_memory(&cache, &oracle, "u1", "User just started learning piano.")
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Added { .. }));
        assert_eq!(cache.all_memories("u1").await.unwrap().len(), before + 1);
    }

    #[tokio::test]
    async fn merge_preserves_mem_id_and_increments_frequency() {
        let cache = InMemoryVkc::new();
        let existing_id = Uuid::new_v4();
        let now = Utc::now();
        cache
            .store_memory(&MemoryRecord {
                id: existing_id,
                user_id: "u1".to_string(),
                memory_text: "User is learning piano.".to_string(),
                embedding: vec![0.1; chatmem_vkc::EMBEDDING_DIM],
                magnitude: 3.0,
                frequency: 1,
                last_used: now,
                created_at: now,
                rfm_score: 3.0,
            })
            .await
            .unwrap();

        let oracle = StubOracle::new()
            .with_response("merge:1")
            .with_response("User practices piano every Tuesday.")
            .with_response("4");

        let outcome = update_user_memory(&cache, &oracle, "u1", "User practices piano every Tuesday.")
            .await
            .unwrap();

        match outcome {
            WriteOutcome::Merged { mem_ids } => assert_eq!(mem_ids, vec![existing_id]),
            other => panic!("expected Merged, got {other:?}"),
        }
        let updated = cache.get_memory("u1", existing_id).await.unwrap().unwrap();
        assert_eq!(updated.frequency, 2);
        assert!(updated.memory_text.contains("Tuesday"));
    }

    #[tokio::test]
    async fn override_replaces_text_and_embedding() {
        let cache = InMemoryVkc::new();
        let existing_id = Uuid::new_v4();
        let now = Utc::now();
        cache
            .store_memory(&MemoryRecord {
                id: existing_id,
                user_id: "u1".to_string(),
                memory_text: "User plays piano.".to_string(),
                embedding: vec![0.1; chatmem_vkc::EMBEDDING_DIM],
                magnitude: 3.0,
                frequency: 1,
                last_used: now,
                created_at: now,
                rfm_score: 3.0,
            })
            .await
            .unwrap();

        let oracle = StubOracle::new().with_response("override:1").with_response("2");
        let outcome = update_user_memory(&cache, &oracle, "u1", "User quit piano and switched to guitar.")
            .await
            .unwrap();

        match outcome {
            WriteOutcome::Overridden { mem_ids } => assert_eq!(mem_ids, vec![existing_id]),
            other => panic!("expected Overridden, got {other:?}"),
        }
        let updated = cache.get_memory("u1", existing_id).await.unwrap().unwrap();
        assert_eq!(updated.frequency, 2);
        assert!(updated.memory_text.contains("guitar"));
    }

    #[tokio::test]
    async fn unknown_decision_is_a_noop() {
        let cache = InMemoryVkc::new();
        let oracle = StubOracle::new().with_response("maybe?");
        let outcome = update_user_memory(&cache, &oracle, "u1", "User likes tea.").await.unwrap();
        assert_eq!(outcome, WriteOutcome::NoOp);
    }
}
