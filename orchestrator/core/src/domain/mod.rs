// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Driver-neutral domain types: identifiers, state models, tenant context,
//! the repository trait surface, and the error taxonomy they share.

pub mod errors;
pub mod ids;
pub mod json_codec;
pub mod org_context;
pub mod repository;
pub mod status;
pub mod task_state;
pub mod user;
pub mod workflow_state;

pub use errors::{OrgAccessError, RepositoryError, StructuredError};
pub use ids::{ApiKeyId, OrgId, TaskExecId, UserId, WorkflowExecId};
pub use org_context::RequestContext;
pub use repository::{OutputTransformer, TaskRepository, TransformError, TrustedOrgResolver, UserRepository, WorkflowRepository};
pub use status::{ExecutionStatus, ExecutionType};
pub use task_state::{ProgressInfo, TaskState, TaskStateFilter, MAX_TASK_TREE_DEPTH};
pub use user::{ApiKey, User};
pub use workflow_state::{WorkflowState, WorkflowStateFilter};
