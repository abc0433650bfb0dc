// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Driver-neutral sentinel errors and the tenant-isolation error taxonomy.
//!
//! Callers compare against these variants for control flow (`workflow_not_ready`
//! is retryable, `workflow_not_found` is not); the repository layer never logs
//! a not-found as an error, only wraps and propagates driver failures.

use serde::Serialize;

/// Errors surfaced by every repository operation.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("user not found")]
    UserNotFound,

    #[error("api key not found")]
    ApiKeyNotFound,

    #[error("task not found")]
    TaskNotFound,

    #[error("workflow not found")]
    WorkflowNotFound,

    /// Completion was attempted while at least one top-level task is still
    /// Running or Pending. Non-fatal; callers reschedule and retry.
    #[error("workflow not ready: top-level tasks still in progress")]
    WorkflowNotReady,

    #[error("admin user already bootstrapped for this organization")]
    AlreadyBootstrapped,

    #[error(transparent)]
    OrgAccess(#[from] OrgAccessError),

    #[error("constraint violation during {operation}: {source}")]
    Conflict { operation: &'static str, source: String },

    #[error("database error during {operation}: {source}")]
    Database { operation: &'static str, source: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The completion protocol's output-coercion step (distinct from a
    /// transformer error, which is recorded on the row and forces `Failed`
    /// instead of propagating): the transformer returned a JSON value that
    /// isn't `null`, an object, or a wrapper whose sole field is an object —
    /// the only three shapes that coerce to `map<string, any>`.
    #[error("cannot coerce workflow output to a map: {0}")]
    OutputCoercion(String),
}

impl RepositoryError {
    pub fn database(operation: &'static str, source: impl std::fmt::Display) -> Self {
        RepositoryError::Database { operation, source: source.to_string() }
    }

    pub fn conflict(operation: &'static str, source: impl std::fmt::Display) -> Self {
        RepositoryError::Conflict { operation, source: source.to_string() }
    }

    /// Whether a caller (an activity worker) should retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::WorkflowNotReady)
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Tagged cross-tenant access errors, never swallowed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrgAccessError {
    #[error("missing organization context")]
    MissingOrgContext,

    #[error("invalid organization context: {0:?}")]
    InvalidOrgContext(String),

    #[error("invalid target organization: {0:?}")]
    InvalidTargetOrg(String),

    #[error("cross-organization access denied: context org {ctx_org:?} does not match target org {target_org:?}")]
    CrossOrgAccessDenied { ctx_org: String, target_org: String },
}

impl OrgAccessError {
    pub fn kind(&self) -> &'static str {
        match self {
            OrgAccessError::MissingOrgContext => "missing_org_context",
            OrgAccessError::InvalidOrgContext(_) => "invalid_org_context",
            OrgAccessError::InvalidTargetOrg(_) => "invalid_target_org",
            OrgAccessError::CrossOrgAccessDenied { .. } => "cross_org_access_denied",
        }
    }
}

/// Structured error persisted on a workflow row's `error` JSON column.
///
/// The only producer in the core is the workflow completion protocol, which
/// records `output_transformation_failed` when a caller-supplied transformer
/// errors; this shape is kept generic so other call sites can reuse it.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub kind: &'static str,
    pub message: String,
}

impl StructuredError {
    pub const OUTPUT_TRANSFORMATION_FAILED: &'static str = "output_transformation_failed";

    pub fn output_transformation_failed(message: impl Into<String>) -> Self {
        Self { kind: Self::OUTPUT_TRANSFORMATION_FAILED, message: message.into() }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("StructuredError always serializes")
    }
}
