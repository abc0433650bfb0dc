// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres-backed integration tests for the auth/user sibling tables.
//!
//! Disabled by default since they need a live database; run with:
//! `DATABASE_URL=postgresql://... cargo test -- --ignored`

use aegis_orchestrator_core::domain::ids::OrgId;
use aegis_orchestrator_core::domain::org_context::context_for_org;
use aegis_orchestrator_core::domain::repository::UserRepository;
use aegis_orchestrator_core::infrastructure::store::Store;
use sqlx::postgres::PgPoolOptions;

async fn test_store() -> Store {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = PgPoolOptions::new().max_connections(5).connect(&database_url).await.expect("connect to postgres");
    sqlx::query(include_str!("../schema.sql")).execute(&pool).await.expect("apply schema");
    Store::from_pool(pool)
}

#[tokio::test]
#[ignore]
async fn bootstrap_admin_is_idempotent_per_tenant() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id);

    let admin = store.users.bootstrap_admin(&ctx, "owner@example.com", b"hashed".to_vec()).await.unwrap();
    assert!(admin.is_admin);

    let second = store.users.bootstrap_admin(&ctx, "other@example.com", b"hashed".to_vec()).await;
    assert!(matches!(second, Err(e) if matches!(e, aegis_orchestrator_core::domain::errors::RepositoryError::AlreadyBootstrapped)));
}

#[tokio::test]
#[ignore]
async fn revoked_api_keys_cannot_be_revoked_twice() {
    let store = test_store().await;
    let org_id = OrgId::new();
    let ctx = context_for_org(org_id);

    let admin = store.users.bootstrap_admin(&ctx, "owner@example.com", b"hashed".to_vec()).await.unwrap();
    let key = store.users.create_api_key(&ctx, &admin.user_id, b"fingerprint".to_vec()).await.unwrap();

    store.users.revoke_api_key(&ctx, &key.key_id).await.unwrap();
    let second_revoke = store.users.revoke_api_key(&ctx, &key.key_id).await;
    assert!(second_revoke.is_err());
}
