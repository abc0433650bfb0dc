// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # aegis-orchestrator-core
//!
//! Persistent state layer for the AEGIS orchestrator's workflow and task
//! executions: the tenant-scoped repository traits, their PostgreSQL
//! implementations, and the workflow completion protocol that reconciles a
//! workflow's status once its top-level tasks finish.
//!
//! ## Layer Structure
//!
//! ```text
//! domain/         ← identifiers, state models, tenant context, repository traits
//!     ↓
//! infrastructure/ ← connection pool, config, Postgres repos, in-memory test doubles
//! ```
//!
//! This crate exposes a library surface only — no gRPC/HTTP presentation
//! layer, no workflow engine, no activity scheduler. Those bounded contexts
//! sit above it and depend on the traits in [`domain::repository`].
//!
//! ## Integration Tests
//!
//! See `orchestrator/core/tests/` for the Postgres-backed integration suite,
//! gated on the `DATABASE_URL` environment variable.

pub mod domain;
pub mod infrastructure;

pub use domain::*;
