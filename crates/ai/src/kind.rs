use core::str::FromStr;

use serde::{Deserialize, Serialize};

use closet_core::DomainError;

/// Kind of AI work a job requests. Wire names are fixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Normalize,
    PriceSuggestion,
    ConditionGrade,
    GenerateListings,
    GenerateEmbedding,
    BulkNormalize,
    BulkPrice,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Normalize,
        JobKind::PriceSuggestion,
        JobKind::ConditionGrade,
        JobKind::GenerateListings,
        JobKind::GenerateEmbedding,
        JobKind::BulkNormalize,
        JobKind::BulkPrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Normalize => "NORMALIZE",
            JobKind::PriceSuggestion => "PRICE_SUGGESTION",
            JobKind::ConditionGrade => "CONDITION_GRADE",
            JobKind::GenerateListings => "GENERATE_LISTINGS",
            JobKind::GenerateEmbedding => "GENERATE_EMBEDDING",
            JobKind::BulkNormalize => "BULK_NORMALIZE",
            JobKind::BulkPrice => "BULK_PRICE",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = JobKind::ALL.iter().map(|k| k.as_str()).collect();
                DomainError::validation(format!("jobType must be one of: {}", names.join(", ")))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_and_as_str_agree() {
        for kind in JobKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_a_validation_error() {
        assert!(matches!(
            "normalize".parse::<JobKind>(),
            Err(DomainError::Validation(_))
        ));
    }
}
