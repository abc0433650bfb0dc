// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `UserRepository` (C8). Auxiliary tenant tables that
//! exercise the same pool, transaction, and tenant-scoping primitives as the
//! execution tables, so the infrastructure doesn't quietly assume it only
//! ever has one kind of row to manage.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::domain::errors::RepositoryError;
use crate::domain::ids::{ApiKeyId, UserId};
use crate::domain::org_context::{must_get_org_id, RequestContext};
use crate::domain::repository::UserRepository;
use crate::domain::user::{ApiKey, User};

#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User, RepositoryError> {
    Ok(User {
        user_id: UserId::from_raw(row.try_get::<String, _>("user_id").map_err(|e| RepositoryError::database("decode_user", e))?),
        org_id: crate::domain::OrgId::parse(
            row.try_get::<String, _>("org_id").map_err(|e| RepositoryError::database("decode_user", e))?,
        )
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        email: row.try_get("email").map_err(|e| RepositoryError::database("decode_user", e))?,
        password_hash: row.try_get("password_hash").map_err(|e| RepositoryError::database("decode_user", e))?,
        is_admin: row.try_get("is_admin").map_err(|e| RepositoryError::database("decode_user", e))?,
        created_at: row.try_get("created_at").map_err(|e| RepositoryError::database("decode_user", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| RepositoryError::database("decode_user", e))?,
    })
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[tracing::instrument(skip(self, ctx, email, password_hash))]
    async fn bootstrap_admin(
        &self,
        ctx: &RequestContext,
        email: &str,
        password_hash: Vec<u8>,
    ) -> Result<User, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;

        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::database("bootstrap_admin", e))?;

        let existing: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE org_id = $1 AND is_admin = true")
            .bind(org_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::database("bootstrap_admin", e))?;

        if existing.is_some() {
            tx.rollback().await.ok();
            return Err(RepositoryError::AlreadyBootstrapped);
        }

        let user_id = UserId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (user_id, org_id, email, password_hash, is_admin, created_at, updated_at)
            VALUES ($1, $2, $3, $4, true, $5, $5)
            "#,
        )
        .bind(user_id.as_str())
        .bind(org_id.as_str())
        .bind(email)
        .bind(&password_hash)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::conflict("bootstrap_admin", e))?;

        tx.commit().await.map_err(|e| RepositoryError::database("bootstrap_admin", e))?;

        Ok(User { user_id, org_id, email: email.to_string(), password_hash, is_admin: true, created_at: now, updated_at: now })
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = %user_id))]
    async fn get_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<User, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let row = sqlx::query(
            "SELECT user_id, org_id, email, password_hash, is_admin, created_at, updated_at FROM users WHERE user_id = $1 AND org_id = $2",
        )
        .bind(user_id.as_str())
        .bind(org_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("get_user", e))?
        .ok_or(RepositoryError::UserNotFound)?;

        row_to_user(&row)
    }

    #[tracing::instrument(skip(self, ctx, fingerprint), fields(user_id = %user_id))]
    async fn create_api_key(
        &self,
        ctx: &RequestContext,
        user_id: &UserId,
        fingerprint: Vec<u8>,
    ) -> Result<ApiKey, RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let key_id = ApiKeyId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO api_keys (key_id, user_id, org_id, fingerprint, created_at, last_used_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, NULL, NULL)
            "#,
        )
        .bind(key_id.as_str())
        .bind(user_id.as_str())
        .bind(org_id.as_str())
        .bind(&fingerprint)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::conflict("create_api_key", e))?;

        Ok(ApiKey {
            key_id,
            user_id: user_id.clone(),
            org_id,
            fingerprint,
            created_at: now,
            last_used_at: None,
            revoked_at: None,
        })
    }

    #[tracing::instrument(skip(self, ctx), fields(key_id = %key_id))]
    async fn revoke_api_key(&self, ctx: &RequestContext, key_id: &ApiKeyId) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let result = sqlx::query(
            "UPDATE api_keys SET revoked_at = now() WHERE key_id = $1 AND org_id = $2 AND revoked_at IS NULL",
        )
        .bind(key_id.as_str())
        .bind(org_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::database("revoke_api_key", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::ApiKeyNotFound);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = %user_id))]
    async fn delete_user(&self, ctx: &RequestContext, user_id: &UserId) -> Result<(), RepositoryError> {
        let org_id = must_get_org_id(ctx)?;
        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::database("delete_user", e))?;

        sqlx::query("DELETE FROM api_keys WHERE user_id = $1 AND org_id = $2")
            .bind(user_id.as_str())
            .bind(org_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::database("delete_user", e))?;

        let result = sqlx::query("DELETE FROM users WHERE user_id = $1 AND org_id = $2")
            .bind(user_id.as_str())
            .bind(org_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::database("delete_user", e))?;

        if result.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(RepositoryError::UserNotFound);
        }

        tx.commit().await.map_err(|e| RepositoryError::database("delete_user", e))?;
        Ok(())
    }
}
