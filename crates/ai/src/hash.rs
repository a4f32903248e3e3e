//! Content hashing for idempotent job reuse.
//!
//! The digest covers `{inputPayload, jobType, promptVersion}` serialized with
//! object keys sorted at every depth, so payloads that differ only in key
//! order hash identically.

use serde_json::{Map, Value as JsonValue, json};
use sha2::{Digest, Sha256};

use crate::job::JsonObject;
use crate::kind::JobKind;

/// Prompt version assumed when a submission doesn't name one.
pub const DEFAULT_PROMPT_VERSION: &str = "v1";

/// Rebuild `value` with every object's keys in lexicographic order.
///
/// `serde_json` keeps insertion order when built with `preserve_order`, so the
/// ordering is made explicit here rather than relying on the map type.
pub fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 (lowercase hex) idempotency key for a unit of AI work.
pub fn input_hash(kind: JobKind, payload: &JsonObject, prompt_version: &str) -> String {
    let doc = json!({
        "inputPayload": payload,
        "jobType": kind.as_str(),
        "promptVersion": prompt_version,
    });
    let canonical = canonicalize(&doc).to_string();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
