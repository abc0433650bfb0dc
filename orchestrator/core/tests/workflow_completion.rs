// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres-backed integration tests for the workflow completion protocol.
//!
//! Disabled by default since they need a live database; run with:
//! `DATABASE_URL=postgresql://... cargo test -- --ignored`

use std::collections::HashMap;

use aegis_orchestrator_core::domain::ids::{OrgId, TaskExecId, WorkflowExecId};
use aegis_orchestrator_core::domain::org_context::context_for_org;
use aegis_orchestrator_core::domain::errors::RepositoryError;
use aegis_orchestrator_core::domain::repository::{OutputTransformer, TaskRepository, TransformError, TrustedOrgResolver, WorkflowRepository};
use aegis_orchestrator_core::domain::status::{ExecutionStatus, ExecutionType};
use aegis_orchestrator_core::domain::task_state::TaskState;
use aegis_orchestrator_core::domain::workflow_state::WorkflowState;
use aegis_orchestrator_core::infrastructure::store::Store;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;

async fn test_store() -> Store {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = PgPoolOptions::new().max_connections(5).connect(&database_url).await.expect("connect to postgres");
    sqlx::query(include_str!("../schema.sql")).execute(&pool).await.expect("apply schema");
    Store::from_pool(pool)
}

fn top_level_task(workflow_exec_id: &WorkflowExecId, org_id: &OrgId, task_id: &str, status: ExecutionStatus) -> TaskState {
    TaskState {
        task_exec_id: TaskExecId::new(),
        task_id: task_id.to_string(),
        workflow_exec_id: workflow_exec_id.clone(),
        workflow_id: "order-fulfillment".to_string(),
        org_id: org_id.clone(),
        component: "task".to_string(),
        status,
        execution_type: ExecutionType::Basic,
        parent_state_id: None,
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
#[ignore]
async fn completes_a_workflow_once_all_top_level_tasks_succeed() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id.clone());
    let workflow_exec_id = WorkflowExecId::new();
    let now = Utc::now();

    store
        .workflows
        .upsert_state(
            &ctx,
            &WorkflowState {
                workflow_exec_id: workflow_exec_id.clone(),
                workflow_id: "order-fulfillment".to_string(),
                org_id: org_id.clone(),
                status: ExecutionStatus::Running,
                input: None,
                output: None,
                error: None,
                created_at: now,
                updated_at: now,
                tasks: HashMap::new(),
            },
        )
        .await
        .unwrap();

    let a = top_level_task(&workflow_exec_id, &org_id, "charge-card", ExecutionStatus::Running);
    store.tasks.upsert_state(&ctx, &a).await.unwrap();

    let not_ready = store.workflows.complete_workflow(&ctx, &workflow_exec_id, None).await;
    assert!(matches!(not_ready, Err(e) if e.is_retryable()));

    let mut a = a;
    a.status = ExecutionStatus::Success;
    store.tasks.upsert_state(&ctx, &a).await.unwrap();

    let completed = store.workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
    assert_eq!(completed.status, ExecutionStatus::Success);
    assert_eq!(completed.output.unwrap()["charge-card"], serde_json::json!({"output": {"task_id": "charge-card"}}));

    let replayed = store.workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
    assert_eq!(replayed.status, ExecutionStatus::Success);
}

#[tokio::test]
#[ignore]
async fn a_failed_top_level_task_fails_the_whole_workflow() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id.clone());
    let workflow_exec_id = WorkflowExecId::new();
    let now = Utc::now();

    store
        .workflows
        .upsert_state(
            &ctx,
            &WorkflowState {
                workflow_exec_id: workflow_exec_id.clone(),
                workflow_id: "order-fulfillment".to_string(),
                org_id: org_id.clone(),
                status: ExecutionStatus::Running,
                input: None,
                output: None,
                error: None,
                created_at: now,
                updated_at: now,
                tasks: HashMap::new(),
            },
        )
        .await
        .unwrap();

    let a = top_level_task(&workflow_exec_id, &org_id, "charge-card", ExecutionStatus::Failed);
    let b = top_level_task(&workflow_exec_id, &org_id, "ship-order", ExecutionStatus::Success);
    store.tasks.upsert_state(&ctx, &a).await.unwrap();
    store.tasks.upsert_state(&ctx, &b).await.unwrap();

    let completed = store.workflows.complete_workflow(&ctx, &workflow_exec_id, None).await.unwrap();
    assert_eq!(completed.status, ExecutionStatus::Failed);
}

#[tokio::test]
#[ignore]
async fn concurrent_completions_settle_on_a_single_terminal_state() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id.clone());
    let workflow_exec_id = WorkflowExecId::new();
    let now = Utc::now();

    store
        .workflows
        .upsert_state(
            &ctx,
            &WorkflowState {
                workflow_exec_id: workflow_exec_id.clone(),
                workflow_id: "order-fulfillment".to_string(),
                org_id: org_id.clone(),
                status: ExecutionStatus::Running,
                input: None,
                output: None,
                error: None,
                created_at: now,
                updated_at: now,
                tasks: HashMap::new(),
            },
        )
        .await
        .unwrap();

    let a = top_level_task(&workflow_exec_id, &org_id, "charge-card", ExecutionStatus::Success);
    store.tasks.upsert_state(&ctx, &a).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let workflows = store.workflows.clone();
        let ctx = ctx.clone();
        let workflow_exec_id = workflow_exec_id.clone();
        handles.push(tokio::spawn(async move {
            workflows.complete_workflow(&ctx, &workflow_exec_id, None).await
        }));
    }

    let mut outputs = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        outputs.push(result);
    }

    assert!(outputs.iter().all(|s| s.status == ExecutionStatus::Success));
    let first_output = outputs[0].output.clone();
    assert!(outputs.iter().all(|s| s.output == first_output));
}

struct NumericTransformer;

#[async_trait::async_trait]
impl OutputTransformer for NumericTransformer {
    async fn transform(&self, _state: &WorkflowState) -> Result<serde_json::Value, TransformError> {
        Ok(serde_json::json!(42))
    }
}

#[tokio::test]
#[ignore]
async fn a_transformer_output_that_cannot_coerce_to_a_map_propagates_and_leaves_the_row_untouched() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id.clone());
    let workflow_exec_id = WorkflowExecId::new();
    let now = Utc::now();

    store
        .workflows
        .upsert_state(
            &ctx,
            &WorkflowState {
                workflow_exec_id: workflow_exec_id.clone(),
                workflow_id: "order-fulfillment".to_string(),
                org_id: org_id.clone(),
                status: ExecutionStatus::Running,
                input: None,
                output: None,
                error: None,
                created_at: now,
                updated_at: now,
                tasks: HashMap::new(),
            },
        )
        .await
        .unwrap();

    let a = top_level_task(&workflow_exec_id, &org_id, "charge-card", ExecutionStatus::Success);
    store.tasks.upsert_state(&ctx, &a).await.unwrap();

    let transformer = NumericTransformer;
    let err = store.workflows.complete_workflow(&ctx, &workflow_exec_id, Some(&transformer)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::OutputCoercion(_)));

    let still_running = store.workflows.get_state(&ctx, &workflow_exec_id).await.unwrap();
    assert_eq!(still_running.status, ExecutionStatus::Running);
}

#[tokio::test]
#[ignore]
async fn task_tree_traversal_respects_tenant_isolation() {
    let store = test_store().await;
    let org_a = OrgId::new();
    let org_b = OrgId::new();
    let ctx_a = context_for_org(org_a.clone());
    let ctx_b = context_for_org(org_b.clone());
    let workflow_exec_id = WorkflowExecId::new();

    let root = top_level_task(&workflow_exec_id, &org_a, "root", ExecutionStatus::Running);
    store.tasks.upsert_state(&ctx_a, &root).await.unwrap();

    let mut child = top_level_task(&workflow_exec_id, &org_a, "child", ExecutionStatus::Running);
    child.parent_state_id = Some(root.task_exec_id.clone());
    store.tasks.upsert_state(&ctx_a, &child).await.unwrap();

    let tree = store.tasks.get_task_tree(&ctx_a, &root.task_exec_id).await.unwrap();
    assert_eq!(tree.len(), 2);

    // Tenant B's lookup doesn't error — the recursive CTE's base case
    // already carries the `org_id` predicate, so a root outside the
    // caller's tenant simply matches no rows rather than surfacing
    // `task_not_found`. Either shape satisfies the "never a row leak"
    // invariant; this crate's Postgres path picks the empty-result one.
    let cross_tenant = store.tasks.get_task_tree(&ctx_b, &root.task_exec_id).await.unwrap();
    assert!(cross_tenant.is_empty());
}

#[tokio::test]
#[ignore]
async fn trusted_org_resolver_recovers_tenant_from_a_bare_execution_id() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id.clone());
    let workflow_exec_id = WorkflowExecId::new();
    let now = Utc::now();

    store
        .workflows
        .upsert_state(
            &ctx,
            &WorkflowState {
                workflow_exec_id: workflow_exec_id.clone(),
                workflow_id: "order-fulfillment".to_string(),
                org_id: org_id.clone(),
                status: ExecutionStatus::Running,
                input: None,
                output: None,
                error: None,
                created_at: now,
                updated_at: now,
                tasks: HashMap::new(),
            },
        )
        .await
        .unwrap();

    let task = top_level_task(&workflow_exec_id, &org_id, "charge-card", ExecutionStatus::Running);
    store.tasks.upsert_state(&ctx, &task).await.unwrap();

    let resolved_workflow_org = store.trusted_org_resolver.org_id_for_workflow_exec(&workflow_exec_id).await.unwrap();
    assert_eq!(resolved_workflow_org, org_id);

    let resolved_task_org = store.trusted_org_resolver.org_id_for_task_exec(&task.task_exec_id).await.unwrap();
    assert_eq!(resolved_task_org, org_id);
}
