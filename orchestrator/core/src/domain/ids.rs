// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Opaque identifiers for tenants, workflow executions, and task executions.
//!
//! All three share the same canonical wire form: a 27-character string drawn
//! from the base62 alphabet (`0-9A-Za-z`). The system tenant is the single
//! named exception — see [`OrgId::system`].

use serde::{Deserialize, Serialize};
use std::fmt;

const BASE62_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b',
    'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];

const CANONICAL_ID_LEN: usize = 27;
const SYSTEM_ORG_LITERAL: &str = "system";

fn generate_canonical_id() -> String {
    nanoid::nanoid!(CANONICAL_ID_LEN, &BASE62_ALPHABET)
}

fn is_canonical_base62(s: &str) -> bool {
    s.len() == CANONICAL_ID_LEN && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Tenant identifier. Either the system literal or a canonical 27-char id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(String);

impl OrgId {
    /// Generate a fresh tenant id in canonical form.
    pub fn new() -> Self {
        Self(generate_canonical_id())
    }

    /// The fixed literal tenant used for system-wide rows.
    pub fn system() -> Self {
        Self(SYSTEM_ORG_LITERAL.to_string())
    }

    /// Parse and validate an org id from its wire form.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidOrgId> {
        let raw = raw.into();
        if is_valid_org_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(InvalidOrgId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_ORG_LITERAL
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// True iff `id` is the system literal or a canonical 27-character base62 id.
///
/// Empty strings and the all-zero identifier are always rejected; the
/// all-zero check is textual (`"00000000-0000-0000-0000-000000000000"` and
/// similarly shaped all-zero strings never match the base62 canonical form
/// anyway, since they're UUID-shaped rather than a bare base62 run, but we
/// reject them explicitly in case a caller hands us one).
pub fn is_valid_org_id(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    if id == SYSTEM_ORG_LITERAL {
        return true;
    }
    if id.chars().all(|c| c == '0') {
        return false;
    }
    is_canonical_base62(id)
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid organization id: {0:?}")]
pub struct InvalidOrgId(pub String);

macro_rules! opaque_exec_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(generate_canonical_id())
            }

            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

opaque_exec_id!(WorkflowExecId, "Opaque identifier for a single workflow execution.");
opaque_exec_id!(TaskExecId, "Opaque identifier for a single task execution.");
opaque_exec_id!(UserId, "Opaque identifier for a user row.");
opaque_exec_id!(ApiKeyId, "Opaque identifier for an API key row.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_all_zero() {
        assert!(!is_valid_org_id(""));
        assert!(!is_valid_org_id("00000000-0000-0000-0000-000000000000"));
        assert!(!is_valid_org_id("000000000000000000000000000"));
    }

    #[test]
    fn accepts_system_literal() {
        assert!(is_valid_org_id("system"));
        assert!(OrgId::system().is_system());
    }

    #[test]
    fn accepts_fresh_canonical_id() {
        let id = OrgId::new();
        assert!(is_valid_org_id(id.as_str()));
        assert_eq!(id.as_str().len(), CANONICAL_ID_LEN);
    }

    #[test]
    fn rejects_wrong_length_and_non_alphanumeric() {
        assert!(!is_valid_org_id("abc"));
        assert!(!is_valid_org_id(&"a".repeat(28)));
        assert!(!is_valid_org_id(&format!("{}-", "a".repeat(26))));
    }

    #[test]
    fn parse_roundtrips_display() {
        let id = OrgId::new();
        let parsed = OrgId::parse(id.as_str().to_string()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.to_string(), parsed.to_string());
    }
}
