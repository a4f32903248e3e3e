use serde_json::Value as JsonValue;

use crate::kind::JobKind;

/// Results below this confidence are held for a human.
pub const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.7;

fn below_threshold(result: &JsonValue, field: &str) -> bool {
    result
        .get(field)
        .and_then(JsonValue::as_f64)
        .is_some_and(|c| c < REVIEW_CONFIDENCE_THRESHOLD)
}

/// Whether a validated result should land in NEEDS_REVIEW instead of SUCCEEDED.
pub fn needs_review(kind: JobKind, result: &JsonValue) -> bool {
    if below_threshold(result, "confidence") {
        return true;
    }

    if kind != JobKind::ConditionGrade {
        return false;
    }

    let major_defect = result
        .get("defects")
        .and_then(JsonValue::as_array)
        .is_some_and(|defects| {
            defects
                .iter()
                .any(|d| d.get("severity").and_then(JsonValue::as_str) == Some("major"))
        });
    let flagged = result.get("requires_manual_review").and_then(JsonValue::as_bool) == Some(true);

    major_defect || flagged || below_threshold(result, "confidence_score")
}
