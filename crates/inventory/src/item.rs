use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use closet_core::{DomainError, ItemId, UserId};

const MAX_TITLE_LEN: usize = 200;

/// A clothing item in a reseller's closet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosetItem {
    pub id: ItemId,
    #[serde(rename = "userId")]
    pub owner: UserId,
    pub title: String,
    pub brand: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub material: Option<String>,
    pub style: Option<String>,
    /// Raw price-suggestion result last applied to this item.
    pub suggested_price: Option<JsonValue>,
    /// Raw condition-grade result last applied to this item.
    pub condition_suggestion: Option<JsonValue>,
    pub last_ai_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub title: String,
    pub brand: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub material: Option<String>,
    pub style: Option<String>,
}

impl ClosetItem {
    /// Build a new item owned by `owner`.
    pub fn create(owner: UserId, new: NewItem, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }

        Ok(Self {
            id: ItemId::new(),
            owner,
            title: title.to_string(),
            brand: new.brand,
            color: new.color,
            tags: new.tags,
            category: new.category,
            subcategory: new.subcategory,
            material: new.material,
            style: new.style,
            suggested_price: None,
            condition_suggestion: None,
            last_ai_run_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update and stamp the AI-run timestamp.
    ///
    /// Only fields present in the patch change.
    pub fn apply_patch(&mut self, patch: &ItemPatch, now: DateTime<Utc>) {
        if let Some(v) = &patch.brand {
            self.brand = Some(v.clone());
        }
        if let Some(v) = &patch.color {
            self.color = Some(v.clone());
        }
        if let Some(v) = &patch.tags {
            self.tags = v.clone();
        }
        if let Some(v) = &patch.category {
            self.category = Some(v.clone());
        }
        if let Some(v) = &patch.subcategory {
            self.subcategory = Some(v.clone());
        }
        if let Some(v) = &patch.material {
            self.material = Some(v.clone());
        }
        if let Some(v) = &patch.style {
            self.style = Some(v.clone());
        }
        if let Some(v) = &patch.suggested_price {
            self.suggested_price = Some(v.clone());
        }
        if let Some(v) = &patch.condition_suggestion {
            self.condition_suggestion = Some(v.clone());
        }
        self.last_ai_run_at = Some(now);
        self.updated_at = now;
    }
}

/// Partial update to a [`ClosetItem`]. `None` means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_price: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_suggestion: Option<JsonValue>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The applied fields as a JSON object (absent fields omitted).
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| JsonValue::Object(Default::default()))
    }
}
