//! Ranking Kernel — pure, deterministic scoring functions shared by the
//! memory engine's retrieval and write paths.
//!
//! Nothing in this crate performs I/O or holds async state; every function
//! is a total function of its inputs so it can be exercised directly in
//! property tests without a cache, broker, or LLM oracle in the loop.

use chrono::{DateTime, Utc};

/// Stepwise recency bucket, 1 (stale) – 5 (today).
///
/// Mirrors the bucket boundaries used by the write path when a memory is
/// created or refreshed: same-day activity is weighted far more heavily
/// than anything older than two weeks.
pub fn recency_score(ts: DateTime<Utc>) -> u8 {
    recency_score_at(ts, Utc::now())
}

/// Same as [`recency_score`] but with an explicit `now`, for deterministic tests.
pub fn recency_score_at(ts: DateTime<Utc>, now: DateTime<Utc>) -> u8 {
    let days_ago = (now - ts).num_days().max(0);
    if days_ago <= 1 {
        5
    } else if days_ago <= 3 {
        4
    } else if days_ago <= 7 {
        3
    } else if days_ago <= 14 {
        2
    } else {
        1
    }
}

/// Weighted Recency/Frequency/Magnitude score, rounded to 2 decimal places.
///
/// `recency*0.3 + frequency*0.2 + magnitude*0.5` — magnitude (the oracle's
/// importance judgement) dominates, recency is a secondary tiebreaker, and
/// frequency rewards memories that keep getting retrieved.
pub fn rfm_score(last_used: DateTime<Utc>, frequency: u32, magnitude: f32) -> f32 {
    rfm_score_at(last_used, frequency, magnitude, Utc::now())
}

/// Same as [`rfm_score`] but with an explicit `now`, for deterministic tests.
pub fn rfm_score_at(
    last_used: DateTime<Utc>,
    frequency: u32,
    magnitude: f32,
    now: DateTime<Utc>,
) -> f32 {
    let recency = recency_score_at(last_used, now) as f32;
    let raw = recency * 0.3 + frequency as f32 * 0.2 + magnitude * 0.5;
    (raw * 100.0).round() / 100.0
}

/// Cosine similarity of two equal-length vectors, clamped to `[0.0, 1.0]`.
///
/// Returns `0.0` when either vector is the zero vector (undefined angle) or
/// when the lengths disagree, rather than panicking — callers in the write
/// path compare freshly embedded candidates against stored embeddings and
/// a mismatched dimension indicates corrupt/legacy data, not a bug to crash on.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}

/// Largest-unit human-readable relative time phrasing, e.g. `"3 days ago"`.
///
/// Used only to annotate memories inside LLM prompts — never stored, so it
/// does not need to round-trip back into a timestamp.
pub fn time_ago_human(past: DateTime<Utc>) -> String {
    time_ago_human_at(past, Utc::now())
}

/// Same as [`time_ago_human`] but with an explicit `now`, for deterministic tests.
pub fn time_ago_human_at(past: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now - past;
    let days = diff.num_days();
    let secs = diff.num_seconds().max(0);

    if days > 365 {
        let years = days / 365;
        pluralize(years, "year")
    } else if days > 30 {
        let months = days / 30;
        pluralize(months, "month")
    } else if days > 0 {
        pluralize(days, "day")
    } else if secs > 3600 {
        pluralize(secs / 3600, "hour")
    } else if secs > 60 {
        pluralize(secs / 60, "minute")
    } else {
        "just now".to_string()
    }
}

fn pluralize(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn recency_buckets_are_monotone_non_increasing() {
        let now = Utc::now();
        let ages = [0, 1, 2, 3, 5, 7, 10, 14, 20, 100];
        let scores: Vec<u8> = ages
            .iter()
            .map(|&d| recency_score_at(now - Duration::days(d), now))
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1], "recency must not increase with age: {scores:?}");
        }
    }

    #[test]
    fn recency_bucket_boundaries_match_spec() {
        let now = Utc::now();
        assert_eq!(recency_score_at(now, now), 5);
        assert_eq!(recency_score_at(now - Duration::days(1), now), 5);
        assert_eq!(recency_score_at(now - Duration::days(3), now), 4);
        assert_eq!(recency_score_at(now - Duration::days(7), now), 3);
        assert_eq!(recency_score_at(now - Duration::days(14), now), 2);
        assert_eq!(recency_score_at(now - Duration::days(15), now), 1);
    }

    #[test]
    fn rfm_score_matches_weighted_formula() {
        let now = Utc::now();
        let score = rfm_score_at(now, 4, 3.0, now);
        // recency=5 at zero age: 5*0.3 + 4*0.2 + 3.0*0.5 = 1.5 + 0.8 + 1.5 = 3.8
        assert!((score - 3.8).abs() < 0.01, "got {score}");
    }

    #[test]
    fn cosine_of_identical_nonzero_vector_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_against_zero_vector_is_zero() {
        let v = vec![1.0_f32, 2.0, 3.0];
        let zero = vec![0.0_f32, 0.0, 0.0];
        assert_eq!(cosine(&v, &zero), 0.0);
    }

    #[test]
    fn cosine_mismatched_length_is_zero_not_panic() {
        assert_eq!(cosine(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn time_ago_human_picks_largest_unit() {
        let now = Utc::now();
        assert_eq!(time_ago_human_at(now, now), "just now");
        assert_eq!(time_ago_human_at(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(time_ago_human_at(now - Duration::hours(2), now), "2 hours ago");
        assert_eq!(time_ago_human_at(now - Duration::days(3), now), "3 days ago");
    }
}
