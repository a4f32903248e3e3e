//! Result schemas the worker checks model output against before a result is
//! persisted. Each kind with a prompt has a typed shape plus range checks that
//! serde alone cannot express.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::kind::JobKind;

pub const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("result is not a JSON object")]
    NotAnObject,

    #[error("result does not match {kind} shape: {message}")]
    Shape { kind: JobKind, message: String },

    #[error("{field} out of range: {message}")]
    OutOfRange { field: String, message: String },

    #[error("no result schema for {0}")]
    NoSchema(JobKind),
}

fn out_of_range(field: impl Into<String>, message: impl Into<String>) -> SchemaError {
    SchemaError::OutOfRange {
        field: field.into(),
        message: message.into(),
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), SchemaError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(field, format!("{value} not in [0, 1]")))
    }
}

#[derive(Debug, Deserialize)]
pub struct NormalizeResult {
    pub category: String,
    pub subcategory: Option<String>,
    pub brand_normalized: Option<String>,
    pub color_hex_or_name: Option<String>,
    pub tags: Vec<String>,
    pub material: Option<String>,
    pub style: Option<String>,
    pub confidence_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSuggestion {
    pub suggested_min_cents: u64,
    pub suggested_median_cents: u64,
    pub suggested_max_cents: u64,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub enum ConditionGrade {
    #[serde(rename = "NWT")]
    NewWithTags,
    #[serde(rename = "NWOT")]
    NewWithoutTags,
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectSeverity {
    Minor,
    Moderate,
    Major,
}

#[derive(Debug, Deserialize)]
pub struct Defect {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: DefectSeverity,
    pub location: Option<String>,
    pub suggested_text_for_listing: String,
}

#[derive(Debug, Deserialize)]
pub struct ConditionReport {
    pub condition_grade: ConditionGrade,
    pub defects: Vec<Defect>,
    pub confidence_score: f64,
    pub requires_manual_review: Option<bool>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ebay,
    Poshmark,
    Grailed,
    Mercari,
    Depop,
    Shopify,
    Generic,
}

#[derive(Debug, Deserialize)]
pub struct ListingVariant {
    pub platform: Platform,
    pub title: String,
    pub short_desc: Option<String>,
    pub long_desc: String,
    pub bullets: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratedListings {
    pub variants: Vec<ListingVariant>,
    pub confidence: f64,
    pub seo_keywords: Option<Vec<String>>,
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f64>,
    pub model: String,
    pub input_text: String,
}

fn parse<T: for<'de> Deserialize<'de>>(kind: JobKind, value: &JsonValue) -> Result<T, SchemaError> {
    T::deserialize(value).map_err(|e| SchemaError::Shape {
        kind,
        message: e.to_string(),
    })
}

/// Check `value` against the result schema for `kind`.
pub fn validate_result(kind: JobKind, value: &JsonValue) -> Result<(), SchemaError> {
    if !value.is_object() {
        return Err(SchemaError::NotAnObject);
    }

    match kind {
        JobKind::Normalize => {
            let r: NormalizeResult = parse(kind, value)?;
            for (field, score) in &r.confidence_scores {
                unit_interval(&format!("confidence_scores.{field}"), *score)?;
            }
        }
        JobKind::PriceSuggestion => {
            let r: PriceSuggestion = parse(kind, value)?;
            unit_interval("confidence", r.confidence)?;
            if r.reasoning.is_empty() {
                return Err(out_of_range("reasoning", "must not be empty"));
            }
        }
        JobKind::ConditionGrade => {
            let r: ConditionReport = parse(kind, value)?;
            unit_interval("confidence_score", r.confidence_score)?;
        }
        JobKind::GenerateListings => {
            let r: GeneratedListings = parse(kind, value)?;
            unit_interval("confidence", r.confidence)?;
            if r.variants.is_empty() {
                return Err(out_of_range("variants", "must not be empty"));
            }
        }
        JobKind::GenerateEmbedding => {
            let r: EmbeddingResult = parse(kind, value)?;
            if r.embedding.len() != EMBEDDING_DIMENSION {
                return Err(out_of_range(
                    "embedding",
                    format!("expected {EMBEDDING_DIMENSION} dimensions, got {}", r.embedding.len()),
                ));
            }
        }
        JobKind::BulkNormalize | JobKind::BulkPrice => return Err(SchemaError::NoSchema(kind)),
    }

    Ok(())
}
