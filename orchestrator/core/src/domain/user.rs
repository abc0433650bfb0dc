// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Auth/user sibling model (C8). Exists to demonstrate that the pool, the
//! transactional boundary, and the JSON codec are general-purpose — this
//! crate's execution tables are not the only tenants of the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ApiKeyId, OrgId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub org_id: OrgId,
    pub email: String,
    /// Opaque byte array — never a plaintext or reversibly-encoded secret.
    pub password_hash: Vec<u8>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: ApiKeyId,
    pub user_id: UserId,
    pub org_id: OrgId,
    pub fingerprint: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}
