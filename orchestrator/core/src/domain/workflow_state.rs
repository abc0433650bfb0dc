// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow execution state: one row per workflow execution, optionally
//! hydrated with its task tree keyed by `task_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::{OrgId, WorkflowExecId};
use super::status::ExecutionStatus;
use super::task_state::TaskState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_exec_id: WorkflowExecId,
    pub workflow_id: String,
    pub org_id: OrgId,
    pub status: ExecutionStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Hydrated task tree, keyed by `task_id`. This is a known lossy
    /// projection — composite parents may reuse a child's `task_id`, in
    /// which case only the most recently created row survives in the map.
    /// Callers that need full fidelity should call `get_task_tree` directly
    /// instead of relying on this field.
    #[serde(default)]
    pub tasks: HashMap<String, TaskState>,
}

impl WorkflowState {
    /// `true` iff `status` is one of the two workflow-terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success | ExecutionStatus::Failed)
    }

    pub fn top_level_tasks(&self) -> impl Iterator<Item = &TaskState> {
        self.tasks.values().filter(|t| t.is_top_level())
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowStateFilter {
    pub workflow_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
