//! HTTP-level guard tests
//!
//! Drives the admin router and a hand-built router through `oneshot`, with a
//! token verifier that maps fixed credentials to outcomes.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use civibook_rbac::{
    AccountGate, GuardPipeline, InMemoryRbacStore, MemoryAuditSink, RbacConfig, RbacStore,
    Requirement, RoleAssignment, TokenError, TokenVerifier, User, VerifiedToken,
};
use civibook_web::{
    admin_router, authenticate, AdminState, Authentication, CurrentUser, RequireLayer,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Accepts `token-<id>`; `expired` and `tampered` fail verification
struct FixedTokens;

#[async_trait]
impl TokenVerifier for FixedTokens {
    async fn verify(&self, credential: &str) -> Result<VerifiedToken, TokenError> {
        match credential {
            "expired" => Err(TokenError::Expired),
            "tampered" => Err(TokenError::InvalidSignature),
            other => other
                .strip_prefix("token-")
                .map(VerifiedToken::new)
                .ok_or_else(|| TokenError::Malformed(other.to_string())),
        }
    }
}

const SUPER_ID: i32 = 1;
const STAFF_ID: i32 = 2;
const INACTIVE_ID: i32 = 3;
const CITIZEN_ID: i32 = 4;

async fn store() -> Result<Arc<InMemoryRbacStore>> {
    let store = Arc::new(InMemoryRbacStore::new());
    store.add_user(User::new(SUPER_ID, "super@example.org")).await;
    store.add_user(User::new(STAFF_ID, "staff@example.org")).await;
    let mut inactive = User::new(INACTIVE_ID, "gone@example.org");
    inactive.is_active = false;
    store.add_user(inactive).await;
    store.add_user(User::new(CITIZEN_ID, "citizen@example.org")).await;
    Ok(store)
}

async fn state(store: Arc<InMemoryRbacStore>) -> Result<AdminState> {
    let state = AdminState::new(
        store.clone(),
        Arc::new(FixedTokens),
        Arc::new(RbacConfig::with_standard_roles()),
        Arc::new(MemoryAuditSink::new()),
    );
    state.roles().seed_standard_roles().await?;

    for (user_id, role) in [
        (SUPER_ID, "super_admin"),
        (STAFF_ID, "staff"),
        (CITIZEN_ID, "citizen"),
    ] {
        let role = store.find_role_by_name(role).await?.unwrap();
        store
            .insert_assignment(RoleAssignment::new(user_id, role.id, None, None))
            .await?;
    }
    Ok(state)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app.clone().oneshot(builder.body(Body::empty())?).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

#[tokio::test]
async fn test_credential_failures_are_unauthenticated() -> Result<()> {
    let app = admin_router(state(store().await?).await?);

    for token in [None, Some("expired"), Some("tampered"), Some("garbage"), Some("token-999")] {
        let (status, body) = call(&app, "GET", "/me", token).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "token {token:?}");
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
        assert_eq!(body["error"]["kind"], "authentication");
    }
    Ok(())
}

#[tokio::test]
async fn test_inactive_account_is_forbidden() -> Result<()> {
    let app = admin_router(state(store().await?).await?);
    let (status, body) = call(&app, "GET", "/me", Some("token-3")).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ACCOUNT_INACTIVE");
    Ok(())
}

#[tokio::test]
async fn test_super_admin_soft_deletes_user() -> Result<()> {
    let store = store().await?;
    let app = admin_router(state(store.clone()).await?);

    let (status, body) = call(&app, "GET", "/users/2/permissions", Some("token-1")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"], json!(["staff"]));

    let (status, body) = call(&app, "DELETE", "/users/2", Some("token-1")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (status, body) = call(&app, "GET", "/users/2/permissions", Some("token-1")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"], json!([]));

    // the row survives for the audit trail
    assert!(store.find_user(STAFF_ID).await?.is_some());

    let (status, body) = call(&app, "GET", "/me", Some("token-2")).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ACCOUNT_INACTIVE");
    Ok(())
}

#[tokio::test]
async fn test_missing_entities_are_not_found() -> Result<()> {
    let app = admin_router(state(store().await?).await?);

    let (status, body) = call(&app, "GET", "/users/404/permissions", Some("token-1")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "USER_NOT_FOUND");

    let (status, body) = call(&app, "DELETE", "/users/2/roles/nonexistent", Some("token-1")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "ROLE_NOT_FOUND");
    Ok(())
}

async fn desk(CurrentUser(ctx): CurrentUser) -> String {
    format!("desk for {}", ctx.user.email)
}

#[tokio::test]
async fn test_custom_router_with_role_requirement() -> Result<()> {
    let store = store().await?;
    state(store.clone()).await?;

    let pipeline = Arc::new(GuardPipeline::new(
        store,
        Arc::new(FixedTokens),
        &RbacConfig::default(),
        Arc::new(MemoryAuditSink::new()),
    ));
    let app = Router::new()
        .route("/desk", get(desk))
        .route_layer(RequireLayer::new(
            pipeline.authorizer().clone(),
            Requirement::any_of_roles(["staff", "admin"]),
        ))
        .layer(middleware::from_fn_with_state(
            Authentication::new(pipeline, AccountGate::Active),
            authenticate,
        ));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/desk")
                .header(header::AUTHORIZATION, "Bearer token-2")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"desk for staff@example.org");

    let (status, body) = call(&app, "GET", "/desk", Some("token-4")).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_PERMISSION");

    // super_admin holds neither role
    let (status, _) = call(&app, "GET", "/desk", Some("token-1")).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}
