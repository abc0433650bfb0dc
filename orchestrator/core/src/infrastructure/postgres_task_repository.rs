// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `TaskRepository` (C5).
//!
//! Every free function here is generic over `sqlx::PgExecutor` so the exact
//! same SQL runs whether the caller hands in the pool directly or `&mut *tx`
//! from a transaction the workflow repository owns — there is no separate
//! `_with_tx` method on the public trait (ADR note in DESIGN.md).

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};

use crate::domain::errors::RepositoryError;
use crate::domain::ids::{OrgId, TaskExecId, WorkflowExecId};
use crate::domain::json_codec;
use crate::domain::org_context::{must_get_org_id, RequestContext};
use crate::domain::repository::TaskRepository;
use crate::domain::status::{ExecutionStatus, ExecutionType};
use crate::domain::task_state::{ProgressInfo, TaskState, TaskStateFilter, MAX_TASK_TREE_DEPTH};

#[derive(Clone)]
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_task_state(row: &sqlx::postgres::PgRow) -> Result<TaskState, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(|e| RepositoryError::database("decode_task_state", e))?;
    let execution_type_raw: String =
        row.try_get("execution_type").map_err(|e| RepositoryError::database("decode_task_state", e))?;

    let status = ExecutionStatus::from_str(&status_raw)
        .map_err(|e| RepositoryError::Serialization(format!("bad status column: {e}")))?;
    let execution_type = ExecutionType::from_str(&execution_type_raw)
        .map_err(|e| RepositoryError::Serialization(format!("bad execution_type column: {e}")))?;

    let parent_state_id: Option<String> =
        row.try_get("parent_state_id").map_err(|e| RepositoryError::database("decode_task_state", e))?;
    let input: Option<serde_json::Value> =
        row.try_get("input").map_err(|e| RepositoryError::database("decode_task_state", e))?;
    let output: Option<serde_json::Value> =
        row.try_get("output").map_err(|e| RepositoryError::database("decode_task_state", e))?;
    let error: Option<serde_json::Value> =
        row.try_get("error").map_err(|e| RepositoryError::database("decode_task_state", e))?;

    Ok(TaskState {
        task_exec_id: TaskExecId::from_raw(row.try_get::<String, _>("task_exec_id").map_err(|e| RepositoryError::database("decode_task_state", e))?),
        task_id: row.try_get("task_id").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        workflow_exec_id: WorkflowExecId::from_raw(
            row.try_get::<String, _>("workflow_exec_id").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        ),
        workflow_id: row.try_get("workflow_id").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        org_id: OrgId::parse(row.try_get::<String, _>("org_id").map_err(|e| RepositoryError::database("decode_task_state", e))?)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        component: row.try_get("component").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        status,
        execution_type,
        parent_state_id: parent_state_id.map(TaskExecId::from_raw),
        agent_id: row.try_get("agent_id").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        action_id: row.try_get("action_id").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        tool_id: row.try_get("tool_id").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        input: json_codec::from_json(input)?,
        output: json_codec::from_json(output)?,
        error: json_codec::from_json(error)?,
        created_at: row.try_get("created_at").map_err(|e| RepositoryError::database("decode_task_state", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| RepositoryError::database("decode_task_state", e))?,
    })
}

/// `WITH RECURSIVE` body shared by `list_tasks_in_workflow` (bounded only by
/// acyclicity, since a whole workflow's tasks are expected to form a forest)
/// and `get_task_tree` (depth-bounded at `MAX_TASK_TREE_DEPTH`, since a caller
/// hands us an arbitrary root and we can't assume the tree beneath it is
/// small).
const TASK_TREE_CTE: &str = r#"
    WITH RECURSIVE descendants AS (
        SELECT *, 0 AS depth
        FROM task_states
        WHERE task_exec_id = $1 AND org_id = $2

        UNION ALL

        SELECT t.*, d.depth + 1
        FROM task_states t
        JOIN descendants d ON t.parent_state_id = d.task_exec_id
        WHERE t.org_id = $2 AND d.depth < $3
    )
    SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
           status, execution_type, parent_state_id, agent_id, action_id, tool_id,
           input, output, error, created_at, updated_at
    FROM descendants
    ORDER BY depth, created_at
"#;

/// Fetch every descendant of `root` (itself included), ordered by depth then
/// creation time, bounded by `MAX_TASK_TREE_DEPTH`. Shared by the trait
/// method below and by the workflow completion protocol, which calls it per
/// top-level task to build the snapshot it aggregates over.
pub async fn fetch_task_tree<'e>(
    executor: impl PgExecutor<'e>,
    org_id: &OrgId,
    root: &TaskExecId,
) -> Result<Vec<TaskState>, RepositoryError> {
    let rows = sqlx::query(TASK_TREE_CTE)
        .bind(root.as_str())
        .bind(org_id.as_str())
        .bind(MAX_TASK_TREE_DEPTH as i32)
        .fetch_all(executor)
        .await
        .map_err(|e| RepositoryError::database("get_task_tree", e))?;

    rows.iter().map(row_to_task_state).collect()
}

/// All tasks belonging to a workflow, keyed by `task_id`. Shared between the
/// public trait method and the completion protocol's snapshot read.
pub async fn fetch_tasks_in_workflow<'e>(
    executor: impl PgExecutor<'e>,
    org_id: &OrgId,
    workflow_exec_id: &WorkflowExecId,
) -> Result<HashMap<String, TaskState>, RepositoryError> {
    let rows = sqlx::query(
        r#"
        SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
               status, execution_type, parent_state_id, agent_id, action_id, tool_id,
               input, output, error, created_at, updated_at
        FROM task_states
        WHERE workflow_exec_id = $1 AND org_id = $2
        ORDER BY created_at
        "#,
    )
    .bind(workflow_exec_id.as_str())
    .bind(org_id.as_str())
    .fetch_all(executor)
    .await
    .map_err(|e| RepositoryError::database("list_tasks_in_workflow", e))?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let state = row_to_task_state(row)?;
        out.insert(state.task_id.clone(), state);
    }
    Ok(out)
}

pub async fn upsert_task_state<'e>(
    executor: impl PgExecutor<'e>,
    state: &TaskState,
) -> Result<(), RepositoryError> {
    let input = json_codec::to_json(&state.input)?;
    let output = json_codec::to_json(&state.output)?;
    let error = json_codec::to_json(&state.error)?;

    sqlx::query(
        r#"
        INSERT INTO task_states (
            task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
            status, execution_type, parent_state_id, agent_id, action_id, tool_id,
            input, output, error, created_at, updated_at
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
        ON CONFLICT (task_exec_id) DO UPDATE SET
            status = EXCLUDED.status,
            execution_type = EXCLUDED.execution_type,
            agent_id = EXCLUDED.agent_id,
            action_id = EXCLUDED.action_id,
            tool_id = EXCLUDED.tool_id,
            input = EXCLUDED.input,
            output = EXCLUDED.output,
            error = EXCLUDED.error,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(state.task_exec_id.as_str())
    .bind(&state.task_id)
    .bind(state.workflow_exec_id.as_str())
    .bind(&state.workflow_id)
    .bind(state.org_id.as_str())
    .bind(&state.component)
    .bind(state.status.as_db_str())
    .bind(state.execution_type.as_db_str())
    .bind(state.parent_state_id.as_ref().map(TaskExecId::as_str))
    .bind(&state.agent_id)
    .bind(&state.action_id)
    .bind(&state.tool_id)
    .bind(input)
    .bind(output)
    .bind(error)
    .bind(state.created_at)
    .bind(state.updated_at)
    .execute(executor)
    .await
    .map_err(|e| RepositoryError::conflict("upsert_task_state", e))?;

    Ok(())
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[tracing::instrument(skip(self, ctx, state), fields(task_exec_id = %state.task_exec_id))]
    async fn upsert_state(&self, ctx: &RequestContext, state: &TaskState) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut state = state.clone();
        state.org_id = org_id;
        upsert_task_state(&self.pool, &state).await
    }

    #[tracing::instrument(skip(self, ctx), fields(task_exec_id = %id))]
    async fn get_state(&self, ctx: &RequestContext, id: &TaskExecId) -> Result<TaskState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let row = sqlx::query(
            r#"
            SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
                   status, execution_type, parent_state_id, agent_id, action_id, tool_id,
                   input, output, error, created_at, updated_at
            FROM task_states
            WHERE task_exec_id = $1 AND org_id = $2
            "#,
        )
        .bind(id.as_str())
        .bind(org_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("get_task_state", e))?
        .ok_or(RepositoryError::TaskNotFound)?;

        row_to_task_state(&row)
    }

    #[tracing::instrument(skip(self, tx, ctx), fields(task_exec_id = %id))]
    async fn get_state_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &RequestContext,
        id: &TaskExecId,
    ) -> Result<TaskState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let row = sqlx::query(
            r#"
            SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
                   status, execution_type, parent_state_id, agent_id, action_id, tool_id,
                   input, output, error, created_at, updated_at
            FROM task_states
            WHERE task_exec_id = $1 AND org_id = $2
            FOR UPDATE
            "#,
        )
        .bind(id.as_str())
        .bind(org_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database("get_task_state_for_update", e))?
        .ok_or(RepositoryError::TaskNotFound)?;

        row_to_task_state(&row)
    }

    #[tracing::instrument(skip(self, ctx, filter))]
    async fn list_states(
        &self,
        ctx: &RequestContext,
        filter: &TaskStateFilter,
    ) -> Result<Vec<TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;

        let mut sql = String::from(
            r#"
            SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
                   status, execution_type, parent_state_id, agent_id, action_id, tool_id,
                   input, output, error, created_at, updated_at
            FROM task_states
            WHERE org_id = $1
            "#,
        );
        let mut bind_idx = 2;
        let mut conditions = Vec::new();

        if filter.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.workflow_exec_id.is_some() {
            conditions.push(format!("workflow_exec_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.task_id.is_some() {
            conditions.push(format!("task_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if let Some(parent) = &filter.parent_state_id {
            match parent {
                None => conditions.push("parent_state_id IS NULL".to_string()),
                Some(_) => {
                    conditions.push(format!("parent_state_id = ${bind_idx}"));
                    bind_idx += 1;
                }
            }
        }
        if filter.agent_id.is_some() {
            conditions.push(format!("agent_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.action_id.is_some() {
            conditions.push(format!("action_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.tool_id.is_some() {
            conditions.push(format!("tool_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.execution_type.is_some() {
            conditions.push(format!("execution_type = ${bind_idx}"));
            bind_idx += 1;
        }
        let _ = bind_idx;

        for cond in &conditions {
            sql.push_str(" AND ");
            sql.push_str(cond);
        }
        sql.push_str(" ORDER BY created_at");

        let mut query = sqlx::query(&sql).bind(org_id.as_str());
        if let Some(status) = filter.status {
            query = query.bind(status.as_db_str());
        }
        if let Some(workflow_exec_id) = &filter.workflow_exec_id {
            query = query.bind(workflow_exec_id.as_str());
        }
        if let Some(task_id) = &filter.task_id {
            query = query.bind(task_id);
        }
        if let Some(Some(parent)) = &filter.parent_state_id {
            query = query.bind(parent.as_str());
        }
        if let Some(agent_id) = &filter.agent_id {
            query = query.bind(agent_id);
        }
        if let Some(action_id) = &filter.action_id {
            query = query.bind(action_id);
        }
        if let Some(tool_id) = &filter.tool_id {
            query = query.bind(tool_id);
        }
        if let Some(execution_type) = filter.execution_type {
            query = query.bind(execution_type.as_db_str());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| RepositoryError::database("list_task_states", e))?;
        rows.iter().map(row_to_task_state).collect()
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_exec_id = %workflow_exec_id))]
    async fn list_tasks_in_workflow(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
    ) -> Result<HashMap<String, TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        fetch_tasks_in_workflow(&self.pool, &org_id, workflow_exec_id).await
    }

    #[tracing::instrument(skip(self, ctx), fields(parent_state_id = %parent_state_id))]
    async fn list_children(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<Vec<TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let rows = sqlx::query(
            r#"
            SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
                   status, execution_type, parent_state_id, agent_id, action_id, tool_id,
                   input, output, error, created_at, updated_at
            FROM task_states
            WHERE parent_state_id = $1 AND org_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(parent_state_id.as_str())
        .bind(org_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("list_children", e))?;

        rows.iter().map(row_to_task_state).collect()
    }

    #[tracing::instrument(skip(self, ctx), fields(parent_state_id = %parent_state_id))]
    async fn list_children_outputs(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<HashMap<String, serde_json::Value>, RepositoryError> {
        let children = self.list_children(ctx, parent_state_id).await?;
        let mut out = HashMap::with_capacity(children.len());
        for child in children {
            if let Some(output) = child.output {
                out.insert(child.task_id, output);
            }
        }
        Ok(out)
    }

    #[tracing::instrument(skip(self, ctx), fields(parent_state_id = %parent_state_id, task_id = %task_id))]
    async fn get_child_by_task_id(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
        task_id: &str,
    ) -> Result<TaskState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let row = sqlx::query(
            r#"
            SELECT task_exec_id, task_id, workflow_exec_id, workflow_id, org_id, component,
                   status, execution_type, parent_state_id, agent_id, action_id, tool_id,
                   input, output, error, created_at, updated_at
            FROM task_states
            WHERE parent_state_id = $1 AND task_id = $2 AND org_id = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(parent_state_id.as_str())
        .bind(task_id)
        .bind(org_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("get_child_by_task_id", e))?
        .ok_or(RepositoryError::TaskNotFound)?;

        row_to_task_state(&row)
    }

    #[tracing::instrument(skip(self, ctx), fields(root = %root))]
    async fn get_task_tree(&self, ctx: &RequestContext, root: &TaskExecId) -> Result<Vec<TaskState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        fetch_task_tree(&self.pool, &org_id, root).await
    }

    #[tracing::instrument(skip(self, ctx), fields(parent_state_id = %parent_state_id))]
    async fn get_progress_info(
        &self,
        ctx: &RequestContext,
        parent_state_id: &TaskExecId,
    ) -> Result<ProgressInfo, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM task_states
            WHERE parent_state_id = $1 AND org_id = $2
            GROUP BY status
            "#,
        )
        .bind(parent_state_id.as_str())
        .bind(org_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("get_progress_info", e))?;

        let mut status_counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let status_raw: String = row.try_get("status").map_err(|e| RepositoryError::database("get_progress_info", e))?;
            let count: i64 = row.try_get("count").map_err(|e| RepositoryError::database("get_progress_info", e))?;
            let status = ExecutionStatus::from_str(&status_raw)
                .map_err(|e| RepositoryError::Serialization(format!("bad status column: {e}")))?;
            status_counts.insert(status, count);
        }

        Ok(ProgressInfo::from_counts(status_counts))
    }

    #[tracing::instrument(skip(self, ctx, children), fields(parent = %parent, child_count = children.len()))]
    async fn create_child_states_in_transaction(
        &self,
        ctx: &RequestContext,
        parent: &TaskExecId,
        children: &[TaskState],
    ) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;

        for child in children {
            if child.parent_state_id.as_ref() != Some(parent) {
                return Err(RepositoryError::conflict(
                    "create_child_states_in_transaction",
                    format!("child {} does not declare parent {}", child.task_exec_id, parent),
                ));
            }
        }

        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::database("create_child_states_in_transaction", e))?;
        for child in children {
            let mut child = child.clone();
            child.org_id = org_id.clone();
            upsert_task_state(&mut *tx, &child).await?;
        }
        tx.commit().await.map_err(|e| RepositoryError::database("create_child_states_in_transaction", e))?;

        Ok(())
    }
}
