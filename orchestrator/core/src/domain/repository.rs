// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository trait surface for the execution-state layer.
//!
//! These traits are the stable, driver-neutral API described in the external
//! interfaces: every method is tenant-scoped through the
//! [`RequestContext`](super::org_context::RequestContext) it is handed, and
//! every multi-statement operation manages its own transaction internally —
//! there is no `_with_tx` variant in this surface. Implementations open and
//! commit their own `sqlx::Transaction` directly; the Postgres repositories
//! delegate the SQL itself to `PgExecutor`-generic free functions shared
//! between the transactional and non-transactional call paths.

use async_trait::async_trait;
use std::collections::HashMap;

use super::errors::RepositoryError;
use super::ids::{ApiKeyId, OrgId, TaskExecId, UserId, WorkflowExecId};
use super::org_context::RequestContext;
use super::task_state::{ProgressInfo, TaskState, TaskStateFilter};
use super::user::{ApiKey, User};
use super::workflow_state::{WorkflowState, WorkflowStateFilter};

/// Caller-supplied hook consulted during workflow completion to produce the
/// final output from the task snapshot. Errors are recorded on the row and
/// force the workflow to Failed; they never abort the transaction outright.
#[async_trait]
pub trait OutputTransformer: Send + Sync {
    async fn transform(&self, state: &WorkflowState) -> Result<serde_json::Value, TransformError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("output transformer failed: {0}")]
pub struct TransformError(pub String);

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn upsert_state(&self, ctx: &RequestContext, state: &TaskState) -> Result<(), RepositoryError>;

    async fn get_state(&self, ctx: &RequestContext, id: &TaskExecId) -> Result<TaskState, RepositoryError>;

    /// Lock the row `FOR UPDATE` inside the given transaction. The
    /// transaction is owned by the caller (typically the workflow
    /// repository's completion protocol); this method never begins or
    /// commits one itself.
    async fn get_state_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ctx: &RequestContext,
        id: &TaskExecId,
    ) -> Result<TaskState, RepositoryError>;

    async fn list_states(
        &self,
        ctx: &RequestContext,
        filter: &TaskStateFilter,
    ) -> Result<Vec<TaskState>, RepositoryError>;

    /// Every task in the workflow, keyed by `task_id`. Lossy when a workflow
    /// reuses a `task_id` under different parents — see
    /// [`WorkflowState::tasks`](super::workflow_state::WorkflowState::tasks).
    async fn list_tasks_in_workflow(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
    ) -> Result<HashMap<String, TaskState>, RepositoryError>;

    async fn list_children(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<Vec<TaskState>, RepositoryError>;

    async fn list_children_outputs(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<HashMap<String, serde_json::Value>, RepositoryError>;

    async fn get_child_by_task_id(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
        task_id: &str,
    ) -> Result<TaskState, RepositoryError>;

    /// Every transitive descendant of `root` (`root` included), ordered by
    /// depth then `created_at`, bounded by
    /// [`MAX_TASK_TREE_DEPTH`](super::task_state::MAX_TASK_TREE_DEPTH).
    async fn get_task_tree(&self, ctx: &RequestContext, root: &TaskExecId) -> Result<Vec<TaskState>, RepositoryError>;

    async fn get_progress_info(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<ProgressInfo, RepositoryError>;

    /// Validate that every child's `parent_state_id` matches `parent`, then
    /// upsert all of them atomically.
    async fn create_child_states_in_transaction(
        &self,
        ctx: &RequestContext,
        parent: &TaskExecId,
        children: &[TaskState],
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn upsert_state(&self, ctx: &RequestContext, state: &WorkflowState) -> Result<(), RepositoryError>;

    async fn update_status(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
        status: super::status::ExecutionStatus,
    ) -> Result<(), RepositoryError>;

    async fn get_state(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
    ) -> Result<WorkflowState, RepositoryError>;

    async fn get_state_by_id(&self, ctx: &RequestContext, workflow_id: &str) -> Result<WorkflowState, RepositoryError>;

    async fn get_state_by_task_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        task_id: &str,
    ) -> Result<WorkflowState, RepositoryError>;

    async fn get_state_by_agent_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        agent_id: &str,
    ) -> Result<WorkflowState, RepositoryError>;

    async fn get_state_by_tool_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        tool_id: &str,
    ) -> Result<WorkflowState, RepositoryError>;

    async fn list_states(
        &self,
        ctx: &RequestContext,
        filter: &WorkflowStateFilter,
    ) -> Result<Vec<WorkflowState>, RepositoryError>;

    /// The workflow completion protocol (ADR-equivalent: see DESIGN.md). Runs
    /// entirely inside one transaction: locks the row, short-circuits if
    /// already terminal, walks the top-level tasks to decide the final
    /// status, computes (or transforms) the output, persists, and re-reads
    /// with tasks hydrated from the same snapshot.
    async fn complete_workflow(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
        output_transformer: Option<&(dyn OutputTransformer)>,
    ) -> Result<WorkflowState, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails closed with `RepositoryError::AlreadyBootstrapped` if an admin
    /// already exists for this tenant, else creates one and returns it.
    async fn bootstrap_admin(
        &self,
        ctx: &RequestContext,
        email: &str,
        password_hash: Vec<u8>,
    ) -> Result<User, RepositoryError>;

    async fn get_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<User, RepositoryError>;

    async fn create_api_key(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        fingerprint: Vec<u8>,
    ) -> Result<ApiKey, RepositoryError>;

    async fn revoke_api_key(&self, ctx: &RequestContext, key_id: &ApiKeyId) -> Result<(), RepositoryError>;

    /// Deletes associated API keys before the user row, inside one
    /// transaction — referential integrity is enforced at the application
    /// level, not by a database foreign key.
    async fn delete_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<(), RepositoryError>;
}

/// Privileged helpers that resolve a row's tenant from its execution id
/// *without* applying tenant filtering. Exist solely so activity workers can
/// establish `RequestContext` from an execution id received over an internal
/// channel — never expose these to untrusted input.
#[async_trait]
pub trait TrustedOrgResolver: Send + Sync {
    async fn org_id_for_workflow_exec(&self, id: &WorkflowExecId) -> Result<OrgId, RepositoryError>;
    async fn org_id_for_task_exec(&self, id: &TaskExecId) -> Result<OrgId, RepositoryError>;
}
