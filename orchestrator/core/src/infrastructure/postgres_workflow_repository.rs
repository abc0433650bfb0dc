// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `WorkflowRepository` (C6), including the workflow
//! completion protocol.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Row};

use crate::domain::errors::{RepositoryError, StructuredError};
use crate::domain::ids::{OrgId, WorkflowExecId};
use crate::domain::json_codec;
use crate::domain::org_context::{must_get_org_id, RequestContext};
use crate::domain::repository::{OutputTransformer, WorkflowRepository};
use crate::domain::status::ExecutionStatus;
use crate::domain::workflow_state::{WorkflowState, WorkflowStateFilter};

use super::postgres_task_repository::fetch_tasks_in_workflow;

#[derive(Clone)]
pub struct PostgresWorkflowRepository {
    pool: PgPool,
}

impl PostgresWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_workflow_state(row: &sqlx::postgres::PgRow) -> Result<WorkflowState, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(|e| RepositoryError::database("decode_workflow_state", e))?;
    let status = ExecutionStatus::from_str(&status_raw)
        .map_err(|e| RepositoryError::Serialization(format!("bad status column: {e}")))?;

    let input: Option<serde_json::Value> =
        row.try_get("input").map_err(|e| RepositoryError::database("decode_workflow_state", e))?;
    let output: Option<serde_json::Value> =
        row.try_get("output").map_err(|e| RepositoryError::database("decode_workflow_state", e))?;
    let error: Option<serde_json::Value> =
        row.try_get("error").map_err(|e| RepositoryError::database("decode_workflow_state", e))?;

    Ok(WorkflowState {
        workflow_exec_id: WorkflowExecId::from_raw(
            row.try_get::<String, _>("workflow_exec_id").map_err(|e| RepositoryError::database("decode_workflow_state", e))?,
        ),
        workflow_id: row.try_get("workflow_id").map_err(|e| RepositoryError::database("decode_workflow_state", e))?,
        org_id: OrgId::parse(row.try_get::<String, _>("org_id").map_err(|e| RepositoryError::database("decode_workflow_state", e))?)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        status,
        input: json_codec::from_json(input)?,
        output: json_codec::from_json(output)?,
        error: json_codec::from_json(error)?,
        created_at: row.try_get("created_at").map_err(|e| RepositoryError::database("decode_workflow_state", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| RepositoryError::database("decode_workflow_state", e))?,
        tasks: Default::default(),
    })
}

async fn fetch_workflow_row<'e>(
    executor: impl PgExecutor<'e>,
    org_id: &OrgId,
    workflow_exec_id: &WorkflowExecId,
) -> Result<WorkflowState, RepositoryError> {
    let row = sqlx::query(
        r#"
        SELECT workflow_exec_id, workflow_id, org_id, status, input, output, error, created_at, updated_at
        FROM workflow_states
        WHERE workflow_exec_id = $1 AND org_id = $2
        "#,
    )
    .bind(workflow_exec_id.as_str())
    .bind(org_id.as_str())
    .fetch_optional(executor)
    .await
    .map_err(|e| RepositoryError::database("get_workflow_state", e))?
    .ok_or(RepositoryError::WorkflowNotFound)?;

    row_to_workflow_state(&row)
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    #[tracing::instrument(skip(self, ctx, state), fields(workflow_exec_id = %state.workflow_exec_id))]
    async fn upsert_state(&self, ctx: &RequestContext, state: &WorkflowState) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let input = json_codec::to_json(&state.input)?;
        let output = json_codec::to_json(&state.output)?;
        let error = json_codec::to_json(&state.error)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_states (
                workflow_exec_id, workflow_id, org_id, status, input, output, error, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (workflow_exec_id, org_id) DO UPDATE SET
                status = EXCLUDED.status,
                input = EXCLUDED.input,
                output = EXCLUDED.output,
                error = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.workflow_exec_id.as_str())
        .bind(&state.workflow_id)
        .bind(org_id.as_str())
        .bind(state.status.as_db_str())
        .bind(input)
        .bind(output)
        .bind(error)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::conflict("upsert_workflow_state", e))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_exec_id = %workflow_exec_id, status = %status))]
    async fn update_status(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
        status: ExecutionStatus,
    ) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let result = sqlx::query(
            "UPDATE workflow_states SET status = $1, updated_at = now() WHERE workflow_exec_id = $2 AND org_id = $3",
        )
        .bind(status.as_db_str())
        .bind(workflow_exec_id.as_str())
        .bind(org_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("update_workflow_status", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::WorkflowNotFound);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_exec_id = %workflow_exec_id))]
    async fn get_state(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
    ) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut state = fetch_workflow_row(&self.pool, &org_id, workflow_exec_id).await?;
        state.tasks = fetch_tasks_in_workflow(&self.pool, &org_id, workflow_exec_id).await?;
        Ok(state)
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %workflow_id))]
    async fn get_state_by_id(&self, ctx: &RequestContext, workflow_id: &str) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let row = sqlx::query(
            r#"
            SELECT workflow_exec_id, workflow_id, org_id, status, input, output, error, created_at, updated_at
            FROM workflow_states
            WHERE workflow_id = $1 AND org_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(org_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("get_workflow_state_by_id", e))?
        .ok_or(RepositoryError::WorkflowNotFound)?;

        let mut state = row_to_workflow_state(&row)?;
        state.tasks = fetch_tasks_in_workflow(&self.pool, &org_id, &state.workflow_exec_id).await?;
        Ok(state)
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %workflow_id, task_id = %task_id))]
    async fn get_state_by_task_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        task_id: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        self.get_state_by_matching_task_column(ctx, workflow_id, "task_id", task_id).await
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %workflow_id, agent_id = %agent_id))]
    async fn get_state_by_agent_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        agent_id: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        self.get_state_by_matching_task_column(ctx, workflow_id, "agent_id", agent_id).await
    }

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %workflow_id, tool_id = %tool_id))]
    async fn get_state_by_tool_id(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        tool_id: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        self.get_state_by_matching_task_column(ctx, workflow_id, "tool_id", tool_id).await
    }

    #[tracing::instrument(skip(self, ctx, filter))]
    async fn list_states(
        &self,
        ctx: &RequestContext,
        filter: &WorkflowStateFilter,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;

        let mut sql = String::from(
            r#"
            SELECT workflow_exec_id, workflow_id, org_id, status, input, output, error, created_at, updated_at
            FROM workflow_states
            WHERE org_id = $1
            "#,
        );
        let mut bind_idx = 2;
        if filter.workflow_id.is_some() {
            sql.push_str(&format!(" AND workflow_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${bind_idx}"));
            bind_idx += 1;
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            sql.push_str(&format!(" LIMIT ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.offset.is_some() {
            sql.push_str(&format!(" OFFSET ${bind_idx}"));
        }

        let mut query = sqlx::query(&sql).bind(org_id.as_str());
        if let Some(workflow_id) = &filter.workflow_id {
            query = query.bind(workflow_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_db_str());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }
        if let Some(offset) = filter.offset {
            query = query.bind(offset);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| RepositoryError::database("list_workflow_states", e))?;
        rows.iter().map(row_to_workflow_state).collect()
    }

    /// Eight-step protocol, run in one transaction against a row-level lock:
    ///
    /// 1. `SELECT ... FOR UPDATE` on the workflow row.
    /// 2. Short-circuit, returning the row unchanged, if it's already
    ///    terminal — completion is idempotent.
    /// 3. Fetch the full task snapshot via the shared recursive CTE.
    /// 4. Derive the final status from the top-level tasks' statuses.
    /// 5. Run the caller's `OutputTransformer`, or fall back to the default
    ///    aggregation (merge of top-level task outputs) when none is given.
    /// 6. On transformer failure, record a `StructuredError` and force
    ///    Failed rather than aborting the transaction.
    /// 7. Persist status/output/error with a tenant-scoped `UPDATE`.
    /// 8. Re-read the row in the same transaction and hydrate `tasks` from
    ///    the snapshot already in hand, so the return value reflects exactly
    ///    what was committed.
    #[tracing::instrument(skip(self, ctx, output_transformer), fields(workflow_exec_id = %workflow_exec_id))]
    async fn complete_workflow(
        &self,
        ctx: &RequestContext,
        workflow_exec_id: &WorkflowExecId,
        output_transformer: Option<&(dyn OutputTransformer)>,
    ) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;

        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::database("complete_workflow", e))?;

        let row = sqlx::query(
            r#"
            SELECT workflow_exec_id, workflow_id, org_id, status, input, output, error, created_at, updated_at
            FROM workflow_states
            WHERE workflow_exec_id = $1 AND org_id = $2
            FOR UPDATE
            "#,
        )
        .bind(workflow_exec_id.as_str())
        .bind(org_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database("complete_workflow", e))?
        .ok_or(RepositoryError::WorkflowNotFound)?;

        let mut state = row_to_workflow_state(&row)?;

        if state.is_terminal() {
            state.tasks = fetch_tasks_in_workflow(&mut *tx, &org_id, workflow_exec_id).await?;
            tx.commit().await.map_err(|e| RepositoryError::database("complete_workflow", e))?;
            return Ok(state);
        }

        let tasks = fetch_tasks_in_workflow(&mut *tx, &org_id, workflow_exec_id).await?;
        state.tasks = tasks;

        let top_level: Vec<_> = state.top_level_tasks().collect();
        if top_level.iter().any(|t| !t.status.is_terminal()) {
            tx.rollback().await.ok();
            return Err(RepositoryError::WorkflowNotReady);
        }

        let any_failed = top_level.iter().any(|t| {
            matches!(t.status, ExecutionStatus::Failed | ExecutionStatus::Canceled | ExecutionStatus::TimedOut)
        });
        let final_status = if any_failed { ExecutionStatus::Failed } else { ExecutionStatus::Success };

        let (output, error) = match output_transformer {
            Some(transformer) => match transformer.transform(&state).await {
                Ok(value) => match coerce_output_to_map(value) {
                    Ok(coerced) => (Some(coerced), None),
                    Err(e) => {
                        tx.rollback().await.ok();
                        return Err(e);
                    }
                },
                Err(e) => {
                    tracing::warn!(workflow_exec_id = %workflow_exec_id, error = %e.0, "output transformer failed");
                    (Some(default_output(&state)), Some(StructuredError::output_transformation_failed(e.0).to_json()))
                }
            },
            None => (Some(default_output(&state)), None),
        };
        let final_status = if error.is_some() { ExecutionStatus::Failed } else { final_status };

        sqlx::query(
            r#"
            UPDATE workflow_states
            SET status = $1, output = $2, error = $3, updated_at = now()
            WHERE workflow_exec_id = $4 AND org_id = $5
            "#,
        )
        .bind(final_status.as_db_str())
        .bind(&output)
        .bind(&error)
        .bind(workflow_exec_id.as_str())
        .bind(org_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database("complete_workflow", e))?;

        let row = sqlx::query(
            r#"
            SELECT workflow_exec_id, workflow_id, org_id, status, input, output, error, created_at, updated_at
            FROM workflow_states
            WHERE workflow_exec_id = $1 AND org_id = $2
            "#,
        )
        .bind(workflow_exec_id.as_str())
        .bind(org_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database("complete_workflow", e))?;

        let mut final_state = row_to_workflow_state(&row)?;
        final_state.tasks = state.tasks;

        tx.commit().await.map_err(|e| RepositoryError::database("complete_workflow", e))?;

        tracing::info!(
            workflow_exec_id = %workflow_exec_id,
            status = %final_state.status,
            "workflow completed"
        );

        Ok(final_state)
    }
}

impl PostgresWorkflowRepository {
    async fn get_state_by_matching_task_column(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        column: &'static str,
        value: &str,
    ) -> Result<WorkflowState, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let sql = format!(
            r#"
            SELECT w.workflow_exec_id, w.workflow_id, w.org_id, w.status, w.input, w.output, w.error,
                   w.created_at, w.updated_at
            FROM workflow_states w
            JOIN task_states t ON t.workflow_exec_id = w.workflow_exec_id AND t.org_id = w.org_id
            WHERE w.workflow_id = $1 AND w.org_id = $2 AND t.{column} = $3
            ORDER BY w.created_at DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(workflow_id)
            .bind(org_id.as_str())
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::database("get_workflow_state_by_task_column", e))?
            .ok_or(RepositoryError::WorkflowNotFound)?;

        let mut state = row_to_workflow_state(&row)?;
        state.tasks = fetch_tasks_in_workflow(&self.pool, &org_id, &state.workflow_exec_id).await?;
        Ok(state)
    }
}

/// Default output used when no `OutputTransformer` is supplied: a map keyed
/// by `task_id` (`serde_json::Map` is a `BTreeMap` under the hood, so
/// insertion order is already lexicographic by key), each value `{ output,
/// parent_state_id? }` — `parent_state_id` is included only when present,
/// which it never is for a top-level task (e.g.
/// `{"a":{"output":{"n":1}},"b":{"output":{"n":2}}}`).
fn default_output(state: &WorkflowState) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for task in state.top_level_tasks() {
        let mut entry = serde_json::Map::new();
        entry.insert("output".to_string(), task.output.clone().unwrap_or(serde_json::Value::Null));
        if let Some(parent) = &task.parent_state_id {
            entry.insert("parent_state_id".to_string(), serde_json::Value::String(parent.as_str().to_string()));
        }
        map.insert(task.task_id.clone(), serde_json::Value::Object(entry));
    }
    serde_json::Value::Object(map)
}

/// Step 6 of the completion protocol: the value a caller-supplied
/// `OutputTransformer` returns must coerce to `map<string, any>` — `null`
/// (an empty map) or a JSON object are accepted as-is; any other JSON type
/// can't be represented as a map and fails to coerce.
fn coerce_output_to_map(value: serde_json::Value) -> Result<serde_json::Value, RepositoryError> {
    match value {
        serde_json::Value::Null => Ok(serde_json::Value::Object(serde_json::Map::new())),
        serde_json::Value::Object(_) => Ok(value),
        other => Err(RepositoryError::OutputCoercion(format!("expected null or an object, got {}", json_value_kind(&other)))),
    }
}

fn json_value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
