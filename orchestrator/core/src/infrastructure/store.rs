// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Top-level handle bundling the three repositories behind one connection
//! pool.
//!
//! There is exactly one backend in scope for this crate, so `Store` is a
//! concrete struct rather than a trait object — the sibling
//! `StorageBackend` enum elsewhere in the orchestrator exists because that
//! context genuinely has multiple backends to switch between; introducing a
//! `dyn Store` here would just be an abstraction with one implementation
//! (see DESIGN.md for the recorded decision).

use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::repository::{TaskRepository, TrustedOrgResolver, UserRepository, WorkflowRepository};
use crate::infrastructure::config::DbConfig;
use crate::infrastructure::db::Database;
use crate::infrastructure::postgres_task_repository::PostgresTaskRepository;
use crate::infrastructure::postgres_user_repository::PostgresUserRepository;
use crate::infrastructure::postgres_workflow_repository::PostgresWorkflowRepository;
use crate::infrastructure::trusted_org_resolver::PostgresTrustedOrgResolver;

/// Bundle of repository handles handed to callers that only need read
/// access — the driver-neutral shape the external-interfaces section calls
/// `read_only(ctx) -> repos`. Cloning `Repos` is cheap; every field is an
/// `Arc`.
#[derive(Clone)]
pub struct Repos {
    pub tasks: Arc<dyn TaskRepository>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub users: Arc<dyn UserRepository>,
}

#[derive(Clone)]
pub struct Store {
    pub tasks: Arc<dyn TaskRepository>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub users: Arc<dyn UserRepository>,
    /// Privileged, unscoped tenant-derivation helper — never exposed to
    /// untrusted input. Used only by activity workers establishing a
    /// `RequestContext` from an execution id they already trust.
    pub trusted_org_resolver: Arc<dyn TrustedOrgResolver>,
    database: Database,
}

impl Store {
    pub async fn connect(config: &DbConfig) -> Result<Self, sqlx::Error> {
        let database = Database::connect(config).await?;
        Ok(Self::from_database(database))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::from_database(Database::from_pool(pool))
    }

    fn from_database(database: Database) -> Self {
        let pool = database.pool().clone();
        Self {
            tasks: Arc::new(PostgresTaskRepository::new(pool.clone())),
            workflows: Arc::new(PostgresWorkflowRepository::new(pool.clone())),
            users: Arc::new(PostgresUserRepository::new(pool.clone())),
            trusted_org_resolver: Arc::new(PostgresTrustedOrgResolver::new(pool)),
            database,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The same repository handles `Store` itself holds, bundled for a
    /// caller that wants a driver-neutral read path without the
    /// `with_transaction` escape hatch below.
    pub fn read_only(&self) -> Repos {
        Repos { tasks: self.tasks.clone(), workflows: self.workflows.clone(), users: self.users.clone() }
    }

    /// Escape hatch for a multi-repository operation that needs its own
    /// transaction beyond what any single repository method offers — every
    /// operation named in this crate's public surface already manages its
    /// own transaction internally, so callers only reach for this when
    /// composing a new cross-repository sequence this crate doesn't name.
    pub async fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut sqlx::Transaction<'static, sqlx::Postgres>) -> futures::future::BoxFuture<'t, Result<T, E>>,
        E: From<sqlx::Error>,
    {
        self.database.with_transaction(f).await
    }
}
