// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL-backed implementations of the domain repository traits, plus
//! the connection pool, configuration, and in-memory test doubles that
//! support them.

pub mod config;
pub mod db;
pub mod mock;
pub mod postgres_task_repository;
pub mod postgres_user_repository;
pub mod postgres_workflow_repository;
pub mod store;
pub mod trusted_org_resolver;

pub use config::DbConfig;
pub use db::Database;
pub use mock::{InMemoryTaskRepository, InMemoryUserRepository, InMemoryWorkflowRepository};
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_user_repository::PostgresUserRepository;
pub use postgres_workflow_repository::PostgresWorkflowRepository;
pub use store::{Repos, Store};
pub use trusted_org_resolver::PostgresTrustedOrgResolver;
