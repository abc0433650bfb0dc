// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared status and execution-kind enums for workflow and task states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status shared by `WorkflowState` and `TaskState` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Waiting,
    Success,
    Failed,
    Canceled,
    TimedOut,
}

impl ExecutionStatus {
    /// Success or Failed for a workflow; Success, Failed, Canceled, or
    /// TimedOut for task aggregation purposes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Canceled
                | ExecutionStatus::TimedOut
        )
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Canceled => "canceled",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized execution status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => ExecutionStatus::Pending,
            "running" => ExecutionStatus::Running,
            "paused" => ExecutionStatus::Paused,
            "waiting" => ExecutionStatus::Waiting,
            "success" => ExecutionStatus::Success,
            "failed" => ExecutionStatus::Failed,
            "canceled" => ExecutionStatus::Canceled,
            "timed_out" => ExecutionStatus::TimedOut,
            other => return Err(ParseStatusError(other.to_string())),
        })
    }
}

/// Task kind discriminator driving how a task's children are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Basic,
    Parallel,
    Collection,
    Composite,
}

impl ExecutionType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ExecutionType::Basic => "basic",
            ExecutionType::Parallel => "parallel",
            ExecutionType::Collection => "collection",
            ExecutionType::Composite => "composite",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ExecutionType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "basic" => ExecutionType::Basic,
            "parallel" => ExecutionType::Parallel,
            "collection" => ExecutionType::Collection,
            "composite" => ExecutionType::Composite,
            other => return Err(ParseStatusError(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_set_matches_task_aggregation_rules() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Canceled.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::Waiting.is_terminal());
    }

    #[test]
    fn db_str_roundtrips_through_from_str() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Waiting,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Canceled,
            ExecutionStatus::TimedOut,
        ] {
            let parsed: ExecutionStatus = status.as_db_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
