//! Embedding normalization for rows coming back from the relational store.
//!
//! The store has seen embeddings written as a plain JSON number array and,
//! from an older client, as a JSON string containing that same array
//! (double-encoded). Both arrive through the same JSONB column, so this is
//! the one place that knows how to flatten either shape into `Vec<f32>`.

use anyhow::{anyhow, Result};
use serde_json::Value;

pub fn normalize_embedding(value: &Value) -> Result<Vec<f32>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| anyhow!("embedding element is not numeric")))
            .collect(),
        Value::String(s) => {
            let parsed: Value =
                serde_json::from_str(s).map_err(|e| anyhow!("embedding string is not valid JSON: {e}"))?;
            normalize_embedding(&parsed)
        }
        Value::Null => Err(anyhow!("embedding is null")),
        other => Err(anyhow!("unsupported embedding shape: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_plain_array() {
        let v = normalize_embedding(&json!([0.1, 0.2, -1.0])).unwrap();
        assert_eq!(v, vec![0.1_f32, 0.2, -1.0]);
    }

    #[test]
    fn normalizes_double_encoded_string() {
        let v = normalize_embedding(&json!("[0.1, 0.2]")).unwrap();
        assert_eq!(v, vec![0.1_f32, 0.2]);
    }

    #[test]
    fn rejects_null() {
        assert!(normalize_embedding(&json!(null)).is_err());
    }

    #[test]
    fn rejects_non_numeric_element() {
        assert!(normalize_embedding(&json!([0.1, "oops"])).is_err());
    }
}
