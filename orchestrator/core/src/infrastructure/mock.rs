// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory repository implementations (C11), mirroring the
//! `InMemory*Repository` fallbacks used elsewhere in the orchestrator when no
//! `DATABASE_URL` is configured. These back the unit tests in this crate that
//! don't need a live Postgres instance; the `tests/` integration suite
//! exercises the real `Postgres*Repository` implementations against an
//! actual database, gated on `DATABASE_URL` being set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::errors::RepositoryError;
use crate::domain::ids::{ApiKeyId, OrgId, TaskExecId, UserId, WorkflowExecId};
use crate::domain::org_context::{must_get_org_id, RequestContext};
use crate::domain::repository::{OutputTransformer, TaskRepository, UserRepository, WorkflowRepository};
use crate::domain::status::ExecutionStatus;
use crate::domain::task_state::{ProgressInfo, TaskState, TaskStateFilter, MAX_TASK_TREE_DEPTH};
use crate::domain::user::{ApiKey, User};
use crate::domain::workflow_state::{WorkflowState, WorkflowStateFilter};

type TaskKey = (String, String);
type WorkflowKey = (String, String);

/// Mirrors `postgres_workflow_repository::coerce_output_to_map` — a
/// transformer's return value must coerce to `map<string, any>`, so `null`
/// becomes an empty map, an object passes through, and anything else fails.
fn coerce_output_to_map(value: serde_json::Value) -> Result<serde_json::Value, RepositoryError> {
    match value {
        serde_json::Value::Null => Ok(serde_json::Value::Object(serde_json::Map::new())),
        serde_json::Value::Object(_) => Ok(value),
        other => Err(RepositoryError::OutputCoercion(format!("expected null or an object, got {other}"))),
    }
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    rows: Mutex<HashMap<TaskKey, TaskState>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(org_id: &OrgId, id: &TaskExecId) -> TaskKey {
        (org_id.as_str().to_string(), id.as_str().to_string())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn upsert_state(&self, ctx: &RequestContext, state: &TaskState) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut state = state.clone();
        state.org_id = org_id.clone();
        self.rows.lock().insert(Self::key(&org_id, &state.task_exec_id), state);
        Ok(())
    }

    async fn get_state(&self, ctx: &RequestContext, id: &TaskExecId) -> Result<TaskState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        self.rows.lock().get(&Self::key(&org_id, id)).cloned().ok_or(RepositoryError::TaskNotFound)
    }

    async fn get_state_for_update(
        &self,
        _tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ctx: &RequestContext,
        id: &TaskExecId,
    ) -> Result<TaskState, RepositoryError> {
        self.get_state(ctx, id).await
    }

    async fn list_states(
        &self,
        ctx: &RequestContext,
        filter: &TaskStateFilter,
    ) -> Result<Vec<TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let rows = self.rows.lock();
        let mut out: Vec<TaskState> = rows
            .values()
            .filter(|t| t.org_id == org_id)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.workflow_exec_id.as_ref().map_or(true, |w| &t.workflow_exec_id == w))
            .filter(|t| filter.task_id.as_ref().map_or(true, |id| &t.task_id == id))
            .filter(|t| match &filter.parent_state_id {
                None => true,
                Some(None) => t.parent_state_id.is_none(),
                Some(Some(p)) => t.parent_state_id.as_ref() == Some(p),
            })
            .filter(|t| filter.agent_id.as_ref().map_or(true, |a| t.agent_id.as_deref() == Some(a.as_str())))
            .filter(|t| filter.action_id.as_ref().map_or(true, |a| t.action_id.as_deref() == Some(a.as_str())))
            .filter(|t| filter.tool_id.as_ref().map_or(true, |a| t.tool_id.as_deref() == Some(a.as_str())))
            .filter(|t| filter.execution_type.map_or(true, |e| t.execution_type == e))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn list_tasks_in_workflow(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
    ) -> Result<HashMap<String, TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .filter(|t| t.org_id == org_id && &t.workflow_exec_id == workflow_exec_id)
            .map(|t| (t.task_id.clone(), t.clone()))
            .collect())
    }

    async fn list_children(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<Vec<TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let rows = self.rows.lock();
        let mut out: Vec<TaskState> = rows
            .values()
            .filter(|t| t.org_id == org_id && t.parent_state_id.as_ref() == Some(parent_state_id))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn list_children_outputs(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<HashMap<String, serde_json::Value>, RepositoryError> {
        let children = self.list_children(ctx, parent_state_id).await?;
        Ok(children.into_iter().filter_map(|t| t.output.map(|o| (t.task_id, o))).collect())
    }

    async fn get_child_by_task_id(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
        task_id: &str,
    ) -> Result<TaskState, RepositoryError> {
        self.list_children(ctx, parent_state_id)
            .await?
            .into_iter()
            .filter(|t| t.task_id == task_id)
            .max_by_key(|t| t.created_at)
            .ok_or(RepositoryError::TaskNotFound)
    }

    async fn get_task_tree(&self, ctx: &RequestContext, root: &TaskExecId) -> Result<Vec<TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let root_state = self.get_state(ctx, root).await?;

        let mut out = vec![root_state];
        let mut frontier = vec![root.clone()];
        let mut depth = 0u32;

        while !frontier.is_empty() && depth < MAX_TASK_TREE_DEPTH {
            let mut next_frontier = Vec::new();
            for parent in &frontier {
                let children = {
                    let rows = self.rows.lock();
                    let mut children: Vec<TaskState> = rows
                        .values()
                        .filter(|t| t.org_id == org_id && t.parent_state_id.as_ref() == Some(parent))
                        .cloned()
                        .collect();
                    children.sort_by_key(|t| t.created_at);
                    children
                };
                for child in children {
                    next_frontier.push(child.task_exec_id.clone());
                    out.push(child);
                }
            }
            frontier = next_frontier;
            depth += 1;
        }

        Ok(out)
    }

    async fn get_progress_info(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<ProgressInfo, RepositoryError> {
        let children = self.list_children(ctx, parent_state_id).await?;
        let mut status_counts: HashMap<ExecutionStatus, i64> = HashMap::new();
        for child in children {
            *status_counts.entry(child.status).or_insert(0) += 1;
        }
        Ok(ProgressInfo::from_counts(status_counts))
    }

    async fn create_child_states_in_transaction(
        &self,
        ctx: &RequestContext,
        parent: &TaskExecId,
        children: &[TaskState],
    ) -> Result<(), RepositoryError> {
        for child in children {
            if child.parent_state_id.as_ref() != Some(parent) {
                return Err(RepositoryError::conflict(
                    "create_child_states_in_transaction",
                    format!("child {} does not declare parent {}", child.task_exec_id, parent),
                ));
            }
        }
        for child in children {
            self.upsert_state(ctx, child).await?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    rows: Mutex<HashMap<WorkflowKey, WorkflowState>>,
    tasks: Arc<InMemoryTaskRepository>,
}

impl InMemoryWorkflowRepository {
    pub fn new(tasks: Arc<InMemoryTaskRepository>) -> Self {
        Self { rows: Mutex::new(HashMap::new()), tasks }
    }

    fn key(org_id: &OrgId, id: &WorkflowExecId) -> WorkflowKey {
        (org_id.as_str().to_string(), id.as_str().to_string())
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn upsert_state(&self, ctx: &RequestContext, state: &WorkflowState) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut state = state.clone();
        state.org_id = org_id.clone();
        self.rows.lock().insert(Self::key(&org_id, &state.workflow_exec_id), state);
        Ok(())
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
        status: ExecutionStatus,
    ) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut rows = self.rows.lock();
        let state = rows.get_mut(&Self::key(&org_id, workflow_exec_id)).ok_or(RepositoryError::WorkflowNotFound)?;
        state.status = status;
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn get_state(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
    ) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut state = self
            .rows
            .lock()
            .get(&Self::key(&org_id, workflow_exec_id))
            .cloned()
            .ok_or(RepositoryError::WorkflowNotFound)?;
        state.tasks = self.tasks.list_tasks_in_workflow(ctx, workflow_exec_id).await?;
        Ok(state)
    }

    async fn get_state_by_id(&self, ctx: &RequestContext, workflow_id: &str) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let found = {
            let rows = self.rows.lock();
            rows.values()
                .filter(|w| w.org_id == org_id && w.workflow_id == workflow_id)
                .max_by_key(|w| w.created_at)
                .cloned()
        };
        let mut state = found.ok_or(RepositoryError::WorkflowNotFound)?;
        state.tasks = self.tasks.list_tasks_in_workflow(ctx, &state.workflow_exec_id).await?;
        Ok(state)
    }

    async fn get_state_by_task_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        task_id: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        self.find_by_task_predicate(ctx, workflow_id, |t| t.task_id == task_id).await
    }

    async fn get_state_by_agent_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        agent_id: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        self.find_by_task_predicate(ctx, workflow_id, |t| t.agent_id.as_deref() == Some(agent_id)).await
    }

    async fn get_state_by_tool_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        tool_id: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        self.find_by_task_predicate(ctx, workflow_id, |t| t.tool_id.as_deref() == Some(tool_id)).await
    }

    async fn list_states(
        &self,
        ctx: &RequestContext,
        filter: &WorkflowStateFilter,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut out: Vec<WorkflowState> = self
            .rows
            .lock()
            .values()
            .filter(|w| w.org_id == org_id)
            .filter(|w| filter.workflow_id.as_ref().map_or(true, |id| &w.workflow_id == id))
            .filter(|w| filter.status.map_or(true, |s| w.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|w| std::cmp::Reverse(w.created_at));
        if let Some(offset) = filter.offset {
            out = out.into_iter().skip(offset.max(0) as usize).collect();
        }
        if let Some(limit) = filter.limit {
            out.truncate(limit.max(0) as usize);
        }
        Ok(out)
    }

    async fn complete_workflow(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
        output_transformer: Option<&(dyn OutputTransformer)>,
    ) -> Result<WorkflowState, RepositoryError> {
        let mut state = self.get_state(ctx, workflow_exec_id).await?;
        if state.is_terminal() {
            return Ok(state);
        }

        let top_level: Vec<_> = state.top_level_tasks().cloned().collect();
        if top_level.iter().any(|t| !t.status.is_terminal()) {
            return Err(RepositoryError::WorkflowNotReady);
        }

        let any_failed = top_level.iter().any(|t| {
            matches!(t.status, ExecutionStatus::Failed | ExecutionStatus::Canceled | ExecutionStatus::TimedOut)
        });
        let mut final_status = if any_failed { ExecutionStatus::Failed } else { ExecutionStatus::Success };

        let default_output = |top_level: &[TaskState]| {
            let mut map = serde_json::Map::new();
            for task in top_level {
                let mut entry = serde_json::Map::new();
                entry.insert("output".to_string(), task.output.clone().unwrap_or(serde_json::Value::Null));
                if let Some(parent) = &task.parent_state_id {
                    entry.insert("parent_state_id".to_string(), serde_json::Value::String(parent.as_str().to_string()));
                }
                map.insert(task.task_id.clone(), serde_json::Value::Object(entry));
            }
            serde_json::Value::Object(map)
        };

        match output_transformer {
            Some(transformer) => match transformer.transform(&state).await {
                Ok(output) => {
                    state.output = Some(coerce_output_to_map(output)?);
                    state.error = None;
                }
                Err(e) => {
                    tracing::warn!(workflow_exec_id = %workflow_exec_id, error = %e.0, "output transformer failed");
                    // A failed transformer still yields the default aggregation as output,
                    // with the failure recorded on `error` instead.
                    state.output = Some(default_output(&top_level));
                    state.error = Some(crate::domain::errors::StructuredError::output_transformation_failed(e.0).to_json());
                    final_status = ExecutionStatus::Failed;
                }
            },
            None => {
                state.output = Some(default_output(&top_level));
            }
        }

        state.status = final_status;
        state.updated_at = Utc::now();
        self.upsert_state(ctx, &state).await?;
        Ok(state)
    }
}

impl InMemoryWorkflowRepository {
    async fn find_by_task_predicate(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        predicate: impl Fn(&TaskState) -> bool,
    ) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let candidates: Vec<WorkflowState> = {
            let rows = self.rows.lock();
            rows.values().filter(|w| w.org_id == org_id && w.workflow_id == workflow_id).cloned().collect()
        };

        for mut candidate in candidates {
            candidate.tasks = self.tasks.list_tasks_in_workflow(ctx, &candidate.workflow_exec_id).await?;
            if candidate.tasks.values().any(&predicate) {
                return Ok(candidate);
            }
        }
        Err(RepositoryError::WorkflowNotFound)
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<HashMap<(String, String), User>>,
    api_keys: Mutex<HashMap<(String, String), ApiKey>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn bootstrap_admin(
        &self,
        ctx: &RequestContext,
        email: &str,
        password_hash: Vec<u8>,
    ) -> Result<User, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut users = self.users.lock();

        if users.values().any(|u| u.org_id == org_id && u.is_admin) {
            return Err(RepositoryError::AlreadyBootstrapped);
        }

        let now = Utc::now();
        let user = User {
            user_id: UserId::new(),
            org_id: org_id.clone(),
            email: email.to_string(),
            password_hash,
            is_admin: true,
            created_at: now,
            updated_at: now,
        };
        users.insert((org_id.as_str().to_string(), user.user_id.as_str().to_string()), user.clone());
        Ok(user)
    }

    async fn get_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<User, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        self.users
            .lock()
            .get(&(org_id.as_str().to_string(), user_id.as_str().to_string()))
            .cloned()
            .ok_or(RepositoryError::UserNotFound)
    }

    async fn create_api_key(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        fingerprint: Vec<u8>,
    ) -> Result<ApiKey, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let key = ApiKey {
            key_id: ApiKeyId::new(),
            user_id: user_id.clone(),
            org_id: org_id.clone(),
            fingerprint,
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
        };
        self.api_keys.lock().insert((org_id.as_str().to_string(), key.key_id.as_str().to_string()), key.clone());
        Ok(key)
    }

    async fn revoke_api_key(&self, ctx: &RequestContext, key_id: &ApiKeyId) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut keys = self.api_keys.lock();
        let key = keys
            .get_mut(&(org_id.as_str().to_string(), key_id.as_str().to_string()))
            .ok_or(RepositoryError::ApiKeyNotFound)?;
        key.revoked_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        self.api_keys.lock().retain(|_, k| !(k.org_id == org_id && &k.user_id == user_id));
        let removed = self.users.lock().remove(&(org_id.as_str().to_string(), user_id.as_str().to_string()));
        removed.map(|_| ()).ok_or(RepositoryError::UserNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::org_context::context_for_org;
    use crate::domain::status::ExecutionType;

    fn new_task(
        workflow_exec_id: &WorkflowExecId,
        org_id: &OrgId,
        task_id: &str,
        status: ExecutionStatus,
        parent: Option<TaskExecId>,
    ) -> TaskState {
        TaskState {
            task_exec_id: TaskExecId::new(),
            task_id: task_id.to_string(),
            workflow_exec_id: workflow_exec_id.clone(),
            workflow_id: "wf".to_string(),
            org_id: org_id.clone(),
            component: "task".to_string(),
            status,
            execution_type: ExecutionType::Basic,
            parent_state_id: parent,
            agent_id: None,
            action_id: None,
            tool_id: None,
            input: None,
            output: Some(serde_json::json!({ "task_id": task_id })),
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn complete_workflow_fails_closed_until_top_level_tasks_are_terminal() {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let workflows = InMemoryWorkflowRepository::new(tasks.clone());

        let org_id = OrgId::new();
        let ctx = context_for_org(org_id.clone());
        let workflow_exec_id = WorkflowExecId::new();

        let state = WorkflowState {
            workflow_exec_id: workflow_exec_id.clone(),
            workflow_id: "wf".to_string(),
            org_id: org_id.clone(),
            status: ExecutionStatus::Running,
            input: None,
            output: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tasks: HashMap::new(),
        };
        workflows.upsert_state(&ctx, &state).await.unwrap();

        let running_task = new_task(&workflow_exec_id, &org_id, "a", ExecutionStatus::Running, None);
        tasks.upsert_state(&ctx, &running_task).await.unwrap();

        let err = workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::WorkflowNotReady));

        let mut rows = tasks.rows.lock();
        let stored = rows.values_mut().find(|t| t.task_id == "a").unwrap();
        stored.status = ExecutionStatus::Success;
        drop(rows);

        let completed = workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
        assert_eq!(completed.status, ExecutionStatus::Success);
        assert_eq!(completed.output.unwrap()["a"], serde_json::json!({"output": {"task_id": "a"}}));
    }

    #[tokio::test]
    async fn complete_workflow_rejects_a_transformer_output_that_cannot_coerce_to_a_map() {
        use crate::domain::repository::{OutputTransformer, TransformError};
        use async_trait::async_trait;

        struct StringTransformer;
        #[async_trait]
        impl OutputTransformer for StringTransformer {
            async fn transform(&self, _state: &WorkflowState) -> Result<serde_json::Value, TransformError> {
                Ok(serde_json::json!("not a map"))
            }
        }

        let tasks = Arc::new(InMemoryTaskRepository::new());
        let workflows = InMemoryWorkflowRepository::new(tasks.clone());

        let org_id = OrgId::new();
        let ctx = context_for_org(org_id.clone());
        let workflow_exec_id = WorkflowExecId::new();

        let state = WorkflowState {
            workflow_exec_id: workflow_exec_id.clone(),
            workflow_id: "wf".to_string(),
            org_id: org_id.clone(),
            status: ExecutionStatus::Running,
            input: None,
            output: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tasks: HashMap::new(),
        };
        workflows.upsert_state(&ctx, &state).await.unwrap();

        let task = new_task(&workflow_exec_id, &org_id, "a", ExecutionStatus::Success, None);
        tasks.upsert_state(&ctx, &task).await.unwrap();

        let transformer = StringTransformer;
        let err = workflows.complete_workflow(&ctx, &workflow_exec_id, Some(&transformer)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::OutputCoercion(_)));
    }

    #[tokio::test]
    async fn complete_workflow_treats_a_canceled_top_level_task_as_failed() {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let workflows = InMemoryWorkflowRepository::new(tasks.clone());

        let org_id = OrgId::new();
        let ctx = context_for_org(org_id.clone());
        let workflow_exec_id = WorkflowExecId::new();

        let state = WorkflowState {
            workflow_exec_id: workflow_exec_id.clone(),
            workflow_id: "wf".to_string(),
            org_id: org_id.clone(),
            status: ExecutionStatus::Running,
            input: None,
            output: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tasks: HashMap::new(),
        };
        workflows.upsert_state(&ctx, &state).await.unwrap();

        let canceled = new_task(&workflow_exec_id, &org_id, "a", ExecutionStatus::Canceled, None);
        tasks.upsert_state(&ctx, &canceled).await.unwrap();

        let completed = workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
        assert_eq!(completed.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn complete_workflow_keeps_default_output_when_the_transformer_errors() {
        use crate::domain::repository::{OutputTransformer, TransformError};
        use async_trait::async_trait;

        struct FailingTransformer;
        #[async_trait]
        impl OutputTransformer for FailingTransformer {
            async fn transform(&self, _state: &WorkflowState) -> Result<serde_json::Value, TransformError> {
                Err(TransformError("transformer blew up".to_string()))
            }
        }

        let tasks = Arc::new(InMemoryTaskRepository::new());
        let workflows = InMemoryWorkflowRepository::new(tasks.clone());

        let org_id = OrgId::new();
        let ctx = context_for_org(org_id.clone());
        let workflow_exec_id = WorkflowExecId::new();

        let state = WorkflowState {
            workflow_exec_id: workflow_exec_id.clone(),
            workflow_id: "wf".to_string(),
            org_id: org_id.clone(),
            status: ExecutionStatus::Running,
            input: None,
            output: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tasks: HashMap::new(),
        };
        workflows.upsert_state(&ctx, &state).await.unwrap();

        let task = new_task(&workflow_exec_id, &org_id, "a", ExecutionStatus::Success, None);
        tasks.upsert_state(&ctx, &task).await.unwrap();

        let transformer = FailingTransformer;
        let completed = workflows.complete_workflow(&ctx, &workflow_exec_id, Some(&transformer)).await.unwrap();
        assert_eq!(completed.status, ExecutionStatus::Failed);
        assert_eq!(completed.output.unwrap()["a"], serde_json::json!({"output": {"task_id": "a"}}));
        assert_eq!(completed.error.unwrap()["kind"], serde_json::json!("output_transformation_failed"));
    }

    #[tokio::test]
    async fn complete_workflow_is_idempotent_once_terminal() {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let workflows = InMemoryWorkflowRepository::new(tasks);

        let org_id = OrgId::new();
        let ctx = context_for_org(org_id.clone());
        let workflow_exec_id = WorkflowExecId::new();

        let state = WorkflowState {
            workflow_exec_id: workflow_exec_id.clone(),
            workflow_id: "wf".to_string(),
            org_id,
            status: ExecutionStatus::Success,
            input: None,
            output: Some(serde_json::json!({"done": true})),
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tasks: HashMap::new(),
        };
        workflows.upsert_state(&ctx, &state).await.unwrap();

        let first = workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
        let second = workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
        assert_eq!(first.output, second.output);
        assert_eq!(second.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn tenant_isolation_hides_rows_from_other_orgs() {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let org_a = OrgId::new();
        let org_b = OrgId::new();
        let ctx_a = context_for_org(org_a.clone());
        let ctx_b = context_for_org(org_b.clone());

        let workflow_exec_id = WorkflowExecId::new();
        let task = new_task(&workflow_exec_id, &org_a, "a", ExecutionStatus::Success, None);
        tasks.upsert_state(&ctx_a, &task).await.unwrap();

        let err = tasks.get_state(&ctx_b, &task.task_exec_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::TaskNotFound));
        assert!(tasks.get_state(&ctx_a, &task.task_exec_id).await.is_ok());
    }
}
