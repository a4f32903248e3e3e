use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role carried in a bearer token.
///
/// Ordinary resellers need no role; the ledger scopes everything by owner.
/// Roles only unlock service surfaces such as the worker trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// May trigger AI job processing (`POST /api/aijobs/process`).
    pub const AI_WORKER: Role = Role(Cow::Borrowed("ai_worker"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_role_matches_its_wire_name() {
        assert_eq!(Role::AI_WORKER, Role::new("ai_worker"));
        let json = serde_json::to_string(&Role::AI_WORKER).unwrap();
        assert_eq!(json, "\"ai_worker\"");
    }
}
