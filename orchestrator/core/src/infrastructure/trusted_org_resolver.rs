// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Privileged tenant-derivation helper (C3's "trusted derivation helpers").
//!
//! Resolves the `org_id` that owns a given execution id *without* going
//! through the tenant-scoped query helpers in C4 — there is no tenant to
//! scope by yet, that's the whole point. Activity workers call this once,
//! immediately after receiving an execution id over an internal channel, to
//! build the [`RequestContext`](crate::domain::org_context::RequestContext)
//! every subsequent repository call requires. Never reachable from
//! untrusted input: a caller who can supply an arbitrary execution id here
//! can read which tenant owns it.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::errors::RepositoryError;
use crate::domain::ids::{OrgId, TaskExecId, WorkflowExecId};
use crate::domain::repository::TrustedOrgResolver;

#[derive(Clone)]
pub struct PostgresTrustedOrgResolver {
    pool: PgPool,
}

impl PostgresTrustedOrgResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrustedOrgResolver for PostgresTrustedOrgResolver {
    #[tracing::instrument(skip(self), fields(workflow_exec_id = %id))]
    async fn org_id_for_workflow_exec(&self, id: &WorkflowExecId) -> Result<OrgId, RepositoryError> {
        let row = sqlx::query("SELECT org_id FROM workflow_states WHERE workflow_exec_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::database("org_id_for_workflow_exec", e))?
            .ok_or(RepositoryError::WorkflowNotFound)?;

        let raw: String = row.try_get("org_id").map_err(|e| RepositoryError::database("org_id_for_workflow_exec", e))?;
        OrgId::parse(raw).map_err(|e| RepositoryError::Serialization(e.to_string()))
    }

    #[tracing::instrument(skip(self), fields(task_exec_id = %id))]
    async fn org_id_for_task_exec(&self, id: &TaskExecId) -> Result<OrgId, RepositoryError> {
        let row = sqlx::query("SELECT org_id FROM task_states WHERE task_exec_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::database("org_id_for_task_exec", e))?
            .ok_or(RepositoryError::TaskNotFound)?;

        let raw: String = row.try_get("org_id").map_err(|e| RepositoryError::database("org_id_for_task_exec", e))?;
        OrgId::parse(raw).map_err(|e| RepositoryError::Serialization(e.to_string()))
    }
}
