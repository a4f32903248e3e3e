use serde_json::Value as JsonValue;

use closet_inventory::ItemPatch;

use crate::kind::JobKind;

type PatchFn = fn(&JsonValue) -> ItemPatch;

/// Kinds whose result writes back to the target item. Anything not listed
/// applies as an empty patch.
const APPLY_TABLE: &[(JobKind, PatchFn)] = &[
    (JobKind::PriceSuggestion, price_patch),
    (JobKind::ConditionGrade, condition_patch),
    (JobKind::Normalize, normalize_patch),
];

/// Translate a job result into the item fields it updates.
pub fn derive_patch(kind: JobKind, result: &JsonValue) -> ItemPatch {
    APPLY_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, f)| f(result))
        .unwrap_or_default()
}

fn price_patch(result: &JsonValue) -> ItemPatch {
    ItemPatch {
        suggested_price: Some(result.clone()),
        ..ItemPatch::default()
    }
}

fn condition_patch(result: &JsonValue) -> ItemPatch {
    ItemPatch {
        condition_suggestion: Some(result.clone()),
        ..ItemPatch::default()
    }
}

/// First non-empty string among `keys`.
fn text(result: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| result.get(*k).and_then(JsonValue::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_patch(result: &JsonValue) -> ItemPatch {
    let tags = result.get("tags").and_then(JsonValue::as_array).and_then(|tags| {
        tags.iter()
            .map(|t| t.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
    });

    ItemPatch {
        brand: text(result, &["brand_normalized", "brand"]),
        color: text(result, &["color_hex_or_name", "color"]),
        tags,
        category: text(result, &["category"]),
        subcategory: text(result, &["subcategory"]),
        material: text(result, &["material"]),
        style: text(result, &["style"]),
        ..ItemPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn price_result_lands_in_suggested_price() {
        let r = json!({"suggestedMedianCents": 2500, "confidence": 0.9});
        let patch = derive_patch(JobKind::PriceSuggestion, &r);
        assert_eq!(patch.suggested_price, Some(r));
        assert_eq!(patch.brand, None);
    }

    #[test]
    fn condition_result_lands_in_condition_suggestion() {
        let r = json!({"condition_grade": "Good", "defects": []});
        let patch = derive_patch(JobKind::ConditionGrade, &r);
        assert_eq!(patch.condition_suggestion, Some(r));
        assert_eq!(patch.suggested_price, None);
    }

    #[test]
    fn normalize_copies_only_present_keys() {
        let r = json!({"category": "Tops", "brand_normalized": "Nike", "tags": ["hoodie", "grey"]});
        let patch = derive_patch(JobKind::Normalize, &r);
        assert_eq!(patch.category.as_deref(), Some("Tops"));
        assert_eq!(patch.brand.as_deref(), Some("Nike"));
        assert_eq!(patch.tags, Some(vec!["hoodie".to_string(), "grey".to_string()]));
        assert_eq!(patch.color, None);
        assert_eq!(patch.material, None);
        assert_eq!(patch.style, None);
    }

    #[test]
    fn normalize_falls_back_to_plain_keys_and_skips_blanks() {
        let r = json!({"brand_normalized": "  ", "brand": "Adidas", "color": "black", "style": ""});
        let patch = derive_patch(JobKind::Normalize, &r);
        assert_eq!(patch.brand.as_deref(), Some("Adidas"));
        assert_eq!(patch.color.as_deref(), Some("black"));
        assert_eq!(patch.style, None);
    }

    #[test]
    fn mixed_tag_array_is_ignored() {
        let patch = derive_patch(JobKind::Normalize, &json!({"tags": ["a", 1]}));
        assert_eq!(patch.tags, None);
    }

    #[test]
    fn other_kinds_apply_nothing() {
        for kind in [JobKind::GenerateListings, JobKind::GenerateEmbedding, JobKind::BulkPrice] {
            assert!(derive_patch(kind, &json!({"category": "Tops"})).is_empty());
        }
    }
}
