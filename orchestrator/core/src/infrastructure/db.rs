// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL connection pool (C1).
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype injected into
//! every repository implementation in this crate, following the pattern the
//! rest of the orchestrator already uses for Postgres-backed state. Unlike
//! the original single-field wrapper, this one is built from a `DbConfig` and
//! pings the pool once at startup so a misconfigured connection string fails
//! fast instead of surfacing on the first request.

use sqlx::postgres::{PgPool, PgPoolOptions};

use super::config::DbConfig;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Build the pool per `config`'s tuning (max/min connections, connect
    /// timeout, health-check period), then ping it once before returning so a
    /// misconfigured connection string fails fast instead of surfacing on the
    /// first request. The ping itself is bounded by `startup_ping_timeout`;
    /// a pool that can't answer `SELECT 1` within that deadline is treated as
    /// unusable.
    pub async fn connect(config: &DbConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .test_before_acquire(true)
            .max_lifetime(config.health_check_period())
            .connect(&config.dsn())
            .await?;

        tokio::time::timeout(config.startup_ping_timeout(), sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)??;

        tracing::info!(max_connections = config.max_connections, "connected to postgres");

        Ok(Self { pool })
    }

    /// Build around an already-open pool, for call sites that manage their
    /// own `PgPool` (tests, and the mock store's sibling real-DB tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err`. `PgPool::begin` hands back a `'static`-lifetime transaction (it
    /// owns a checked-out connection rather than borrowing the pool), so the
    /// closure can be plain `async` without any lifetime ceremony.
    pub async fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(
            &'t mut sqlx::Transaction<'static, sqlx::Postgres>,
        ) -> futures::future::BoxFuture<'t, Result<T, E>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}
