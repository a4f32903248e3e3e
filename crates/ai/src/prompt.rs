use serde_json::Value as JsonValue;

use crate::job::AiJob;
use crate::kind::JobKind;
use crate::result::AiError;

pub const SYSTEM_PROMPT: &str =
    "You assist clothing resellers. Answer with a single JSON object and nothing else.";

fn field<'a>(job: &'a AiJob, key: &str) -> &'a str {
    job.input_payload
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or("n/a")
}

fn platforms(job: &AiJob) -> String {
    let listed: Vec<&str> = job
        .input_payload
        .get("platforms")
        .and_then(JsonValue::as_array)
        .map(|ps| ps.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default();
    if listed.is_empty() {
        "ebay, poshmark".to_string()
    } else {
        listed.join(", ")
    }
}

/// Render the user prompt for `job`.
///
/// Only kinds with a result the worker can act on have a prompt; the rest
/// fail with [`AiError::Unsupported`].
pub fn build_prompt(job: &AiJob) -> Result<String, AiError> {
    let prompt = match job.kind {
        JobKind::Normalize => format!(
            "Normalize the attributes of this clothing item.\n\
             Title: {}\nDescription: {}\n\n\
             Respond with keys: category, subcategory, brand_normalized, color_hex_or_name, \
             tags (array of strings), material, style, and confidence_scores \
             (object mapping each field to a number between 0 and 1).",
            field(job, "title"),
            field(job, "description"),
        ),
        JobKind::PriceSuggestion => {
            let details = serde_json::to_string_pretty(&job.input_payload)
                .map_err(|e| AiError::Internal(e.to_string()))?;
            format!(
                "Suggest a resale price range for this clothing item.\n{details}\n\n\
                 Respond with integer keys suggestedMinCents, suggestedMedianCents, \
                 suggestedMaxCents, a confidence between 0 and 1, and reasoning \
                 (non-empty array of strings)."
            )
        }
        JobKind::ConditionGrade => format!(
            "Grade the condition of this clothing item.\nTitle: {}\nNotes: {}\n\n\
             Respond with condition_grade (one of NWT, NWOT, Excellent, Good, Fair, Poor), \
             defects (array of {{type, severity: minor|moderate|major, location, \
             suggested_text_for_listing}}), confidence_score between 0 and 1, \
             requires_manual_review (boolean) and reasoning.",
            field(job, "title"),
            field(job, "notes"),
        ),
        JobKind::GenerateListings => format!(
            "Write marketplace listings for this clothing item.\n\
             Title: {}\nBrand: {}\nCategory: {}\nPlatforms: {}\n\n\
             Respond with variants (array of {{platform, title, short_desc, long_desc, \
             bullets, tags}}), confidence between 0 and 1, and seo_keywords.",
            field(job, "title"),
            field(job, "brand"),
            field(job, "category"),
            platforms(job),
        ),
        other => return Err(AiError::Unsupported(other)),
    };
    Ok(prompt)
}
