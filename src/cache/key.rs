//! Deterministic cache-key fingerprinting.
//!
//! Keys have the shape `op:model:promptCacheVersion:schemaVersion:payloadHash`
//! where the payload hash is SHA-256 over a canonical JSON serialization
//! (object keys sorted recursively, no insignificant whitespace). Two
//! requests with the same canonical payload always share a key.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::operation::{MapColumnsRequest, Operation};

/// Serialize a JSON value canonically: object keys sorted at every level.
///
/// `serde_json::Map` preserves insertion order, so the same struct always
/// serializes identically; sorting makes the form independent of how the
/// value was assembled.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                out.push('{');
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    // Key serialization cannot fail for a String.
                    out.push_str(&serde_json::to_string(key).unwrap_or_default());
                    out.push(':');
                    write(&map[key.as_str()], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => {
                out.push_str(&other.to_string());
            }
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// SHA-256 hex digest of the canonical serialization of `payload`.
pub fn payload_hash(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(payload).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build a full cache key for an operation call.
pub fn make_cache_key(
    op: Operation,
    model: &str,
    prompt_cache_version: &str,
    schema_version: &str,
    payload: &Value,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        op.id(),
        model,
        prompt_cache_version,
        schema_version,
        payload_hash(payload)
    )
}

/// Payload hash for MapColumns with header normalization: headers are
/// lowercased and sorted before hashing, so any permutation of the same
/// header multiset produces the same hash. Sample rows are excluded since
/// their order follows the header order.
pub fn normalized_mapping_hash(request: &MapColumnsRequest) -> String {
    let mut headers: Vec<String> = request
        .headers
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    headers.sort();

    let payload = serde_json::json!({
        "headers": headers,
        "schemaType": request.schema_type,
        "language": request.language,
    });
    payload_hash(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_request(headers: &[&str]) -> MapColumnsRequest {
        MapColumnsRequest {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            sample_rows: vec![],
            schema_type: "task_list".to_string(),
            language: "en".to_string(),
        }
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a: Value = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn payload_hash_is_deterministic() {
        let payload = serde_json::json!({"headers": ["ID", "Title"], "language": "en"});
        let h1 = payload_hash(&payload);
        let h2 = payload_hash(&payload);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64); // SHA-256 hex
    }

    #[test]
    fn key_embeds_all_version_fragments() {
        let payload = serde_json::json!({"content": "x"});
        let key = make_cache_key(Operation::AnalyzePaste, "gpt-4o", "v1:abcd1234", "v1", &payload);
        assert!(key.starts_with("analyze_paste:gpt-4o:v1:abcd1234:v1:"));
    }

    #[test]
    fn different_prompt_versions_get_different_keys() {
        let payload = serde_json::json!({"content": "x"});
        let k1 = make_cache_key(Operation::AnalyzePaste, "m", "v1:aaaa", "v1", &payload);
        let k2 = make_cache_key(Operation::AnalyzePaste, "m", "v2:bbbb", "v1", &payload);
        assert_ne!(k1, k2);
    }

    #[test]
    fn normalized_hash_ignores_header_order() {
        let h1 = normalized_mapping_hash(&mapping_request(&["ID", "Title", "Description"]));
        let h2 = normalized_mapping_hash(&mapping_request(&["Description", "Title", "ID"]));
        assert_eq!(h1, h2);
    }

    #[test]
    fn normalized_hash_ignores_header_case() {
        let h1 = normalized_mapping_hash(&mapping_request(&["id", "title"]));
        let h2 = normalized_mapping_hash(&mapping_request(&["ID", "TITLE"]));
        assert_eq!(h1, h2);
    }

    #[test]
    fn normalized_hash_distinguishes_header_sets() {
        let h1 = normalized_mapping_hash(&mapping_request(&["id", "title"]));
        let h2 = normalized_mapping_hash(&mapping_request(&["id", "owner"]));
        assert_ne!(h1, h2);
    }

    #[test]
    fn normalized_hash_distinguishes_schema_type() {
        let mut a = mapping_request(&["id"]);
        let b = mapping_request(&["id"]);
        a.schema_type = "generic".to_string();
        assert_ne!(normalized_mapping_hash(&a), normalized_mapping_hash(&b));
    }
}
