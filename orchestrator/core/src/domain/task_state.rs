// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task execution state: one row per task execution, nested via
//! `parent_state_id` into an arbitrarily deep task tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::{OrgId, TaskExecId, WorkflowExecId};
use super::status::{ExecutionStatus, ExecutionType};

/// Maximum depth the hierarchical task read will traverse. A task tree
/// deeper than this is refused rather than walked, per the acyclicity and
/// bounded-depth invariants on the task model.
pub const MAX_TASK_TREE_DEPTH: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_exec_id: TaskExecId,
    pub task_id: String,
    pub workflow_exec_id: WorkflowExecId,
    pub workflow_id: String,
    pub org_id: OrgId,
    pub component: String,
    pub status: ExecutionStatus,
    pub execution_type: ExecutionType,
    pub parent_state_id: Option<TaskExecId>,
    pub agent_id: Option<String>,
    pub action_id: Option<String>,
    pub tool_id: Option<String>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn is_top_level(&self) -> bool {
        self.parent_state_id.is_none()
    }
}

/// Predicate fields for `list_states`. All `None` by default — an empty
/// filter returns every row visible to the tenant.
#[derive(Debug, Clone, Default)]
pub struct TaskStateFilter {
    pub status: Option<ExecutionStatus>,
    pub workflow_exec_id: Option<WorkflowExecId>,
    pub task_id: Option<String>,
    /// `None` — don't filter on parent. `Some(None)` — top-level tasks only.
    /// `Some(Some(id))` — children of a specific parent.
    pub parent_state_id: Option<Option<TaskExecId>>,
    pub agent_id: Option<String>,
    pub action_id: Option<String>,
    pub tool_id: Option<String>,
    pub execution_type: Option<ExecutionType>,
}

/// `GROUP BY status` aggregation over a parent's direct children.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub status_counts: HashMap<ExecutionStatus, i64>,
    pub pending_count: i64,
    pub running_count: i64,
    pub terminal_count: i64,
    pub total_children: i64,
    pub completion_rate: f64,
    pub failure_rate: f64,
}

impl ProgressInfo {
    /// Build from raw per-status counts (as returned by `GROUP BY status`).
    pub fn from_counts(status_counts: HashMap<ExecutionStatus, i64>) -> Self {
        let count = |s: ExecutionStatus| *status_counts.get(&s).unwrap_or(&0);

        let pending_count = count(ExecutionStatus::Pending);
        let running_count =
            count(ExecutionStatus::Running) + count(ExecutionStatus::Waiting) + count(ExecutionStatus::Paused);
        let terminal_count = count(ExecutionStatus::Success)
            + count(ExecutionStatus::Failed)
            + count(ExecutionStatus::Canceled)
            + count(ExecutionStatus::TimedOut);
        let total_children: i64 = status_counts.values().sum();

        let (completion_rate, failure_rate) = if total_children == 0 {
            (0.0, 0.0)
        } else {
            let success = count(ExecutionStatus::Success) as f64;
            let failed_like = (count(ExecutionStatus::Failed) + count(ExecutionStatus::TimedOut)) as f64;
            (success / total_children as f64, failed_like / total_children as f64)
        };

        Self {
            status_counts,
            pending_count,
            running_count,
            terminal_count,
            total_children,
            completion_rate,
            failure_rate,
        }
    }
}
