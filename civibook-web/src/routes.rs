//! Admin API router
//!
//! Every route authenticates with the verified-account gate. The `/users`,
//! `/roles` and `/permissions` trees additionally require at least the
//! `admin` level; finer permission and hierarchy checks happen in the core
//! services each handler calls.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use civibook_rbac::{
    AccountGate, AdminLevel, AssignOptions, AssignmentOutcome, AssignmentResult, AuditSink,
    GuardPipeline, NewRole, Permission, RbacConfig, RbacResult, RbacStore, Requirement,
    ResolvedAccess, Role, RoleAssignmentService, RoleDeletion, RoleManager, RoleQuery, RoleUpdate,
    TokenVerifier, User, UserAdministration, UserQuery,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::WebResult;
use crate::middleware::{
    authenticate, request_id_middleware, Authentication, CurrentUser, RequireLayer,
};

/// Shared state of the admin router
#[derive(Clone)]
pub struct AdminState {
    pipeline: Arc<GuardPipeline>,
    users: UserAdministration,
    roles: RoleManager,
    assignments: RoleAssignmentService,
}

impl AdminState {
    pub fn new(
        store: Arc<dyn RbacStore>,
        verifier: Arc<dyn TokenVerifier>,
        config: Arc<RbacConfig>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let pipeline = Arc::new(GuardPipeline::new(store.clone(), verifier, &config, sink));
        let authorizer = pipeline.authorizer().clone();

        Self {
            users: UserAdministration::new(store.clone(), authorizer.clone()),
            roles: RoleManager::new(store.clone(), authorizer.clone(), config),
            assignments: RoleAssignmentService::new(store, authorizer),
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Arc<GuardPipeline> {
        &self.pipeline
    }

    pub fn roles(&self) -> &RoleManager {
        &self.roles
    }
}

/// Build the admin router with authentication and correlation ids applied
pub fn admin_router(state: AdminState) -> Router {
    let authorizer = state.pipeline.authorizer().clone();
    let auth = Authentication::new(state.pipeline.clone(), AccountGate::Verified);

    let admin = Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", delete(delete_user))
        .route("/users/{id}/active", patch(set_active))
        .route("/users/{id}/verified", patch(set_verified))
        .route("/users/{id}/permissions", get(user_permissions))
        .route("/users/{id}/roles", post(assign_role))
        .route("/users/{id}/roles/{role}", delete(revoke_role))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/{id}", patch(update_role).delete(delete_role))
        .route(
            "/roles/{id}/permissions",
            get(role_permissions).post(grant_permission),
        )
        .route(
            "/roles/{id}/permissions/{permission}",
            delete(revoke_permission),
        )
        .route("/permissions", post(create_permission))
        .route_layer(RequireLayer::new(
            authorizer,
            Requirement::admin_level(AdminLevel::Admin),
        ));

    Router::new()
        .route("/me", get(me))
        .merge(admin)
        .layer(middleware::from_fn_with_state(auth, authenticate))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

async fn me(CurrentUser(ctx): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        roles: ctx.role_names(),
        permissions: ctx.permissions.to_vec(),
        user: ctx.user,
    })
}

/// Query string of `GET /users`
#[derive(Debug, Default, Deserialize)]
pub struct UserListParams {
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub is_active: Option<bool>,
    pub is_system_user: Option<bool>,
    pub email: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl UserListParams {
    pub fn into_query(self) -> RbacResult<UserQuery> {
        let mut query = UserQuery {
            is_active: self.is_active,
            is_system_user: self.is_system_user,
            email_contains: self.email,
            ..UserQuery::default()
        };
        if let Some(sort_by) = &self.sort_by {
            query.sort = sort_by.parse()?;
        }
        if let Some(order) = &self.order {
            query.order = order.parse()?;
        }
        if let Some(offset) = self.offset {
            query.offset = offset;
        }
        if let Some(limit) = self.limit {
            query.limit = limit.min(500);
        }
        Ok(query)
    }
}

/// Query string of `GET /roles`
#[derive(Debug, Default, Deserialize)]
pub struct RoleListParams {
    pub sort_by: Option<String>,
    pub order: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

impl RoleListParams {
    pub fn into_query(self) -> RbacResult<RoleQuery> {
        let mut query = RoleQuery {
            include_inactive: self.include_inactive,
            ..RoleQuery::default()
        };
        if let Some(sort_by) = &self.sort_by {
            query.sort = sort_by.parse()?;
        }
        if let Some(order) = &self.order {
            query.order = order.parse()?;
        }
        Ok(query)
    }
}

async fn list_users(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Query(params): Query<UserListParams>,
) -> WebResult<Json<Vec<User>>> {
    let query = params.into_query()?;
    Ok(Json(state.users.list_users(&ctx, &query).await?))
}

async fn user_permissions(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(user_id): Path<i32>,
) -> WebResult<Json<ResolvedAccess>> {
    Ok(Json(state.users.user_permissions(&ctx, user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

async fn set_active(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(user_id): Path<i32>,
    Json(body): Json<ActiveRequest>,
) -> WebResult<Json<User>> {
    Ok(Json(state.users.set_active(&ctx, user_id, body.active).await?))
}

#[derive(Debug, Deserialize)]
pub struct VerifiedRequest {
    pub verified: bool,
}

async fn set_verified(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(user_id): Path<i32>,
    Json(body): Json<VerifiedRequest>,
) -> WebResult<Json<User>> {
    Ok(Json(
        state.users.set_verified(&ctx, user_id, body.verified).await?,
    ))
}

async fn delete_user(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(user_id): Path<i32>,
) -> WebResult<Json<User>> {
    Ok(Json(state.users.delete_user(&ctx, user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Fail with a conflict instead of refreshing an active assignment
    #[serde(default)]
    pub create_only: bool,
}

async fn assign_role(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(user_id): Path<i32>,
    Json(body): Json<AssignRoleRequest>,
) -> WebResult<(StatusCode, Json<AssignmentResult>)> {
    let mut options = if body.create_only {
        AssignOptions::create_only()
    } else {
        AssignOptions::default()
    };
    options.expires_at = body.expires_at;

    let result = state
        .assignments
        .assign_role(&ctx, user_id, &body.role, options)
        .await?;
    let status = match result.outcome {
        AssignmentOutcome::Created => StatusCode::CREATED,
        AssignmentOutcome::Reactivated | AssignmentOutcome::Refreshed => StatusCode::OK,
    };
    Ok((status, Json(result)))
}

async fn revoke_role(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path((user_id, role)): Path<(i32, String)>,
) -> WebResult<Json<Value>> {
    let revoked = state.assignments.revoke_role(&ctx, user_id, &role).await?;
    Ok(Json(json!({ "revoked": revoked.is_some() })))
}

async fn list_roles(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Query(params): Query<RoleListParams>,
) -> WebResult<Json<Vec<Role>>> {
    let query = params.into_query()?;
    Ok(Json(state.roles.list_roles(&ctx, &query).await?))
}

async fn create_role(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<NewRole>,
) -> WebResult<(StatusCode, Json<Role>)> {
    let role = state.roles.create_role(&ctx, body).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

async fn update_role(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(role_id): Path<i32>,
    Json(body): Json<RoleUpdate>,
) -> WebResult<Json<Role>> {
    Ok(Json(state.roles.update_role(&ctx, role_id, body).await?))
}

async fn delete_role(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(role_id): Path<i32>,
) -> WebResult<Json<RoleDeletion>> {
    Ok(Json(state.roles.delete_role(&ctx, role_id).await?))
}

async fn role_permissions(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(role_id): Path<i32>,
) -> WebResult<Json<Vec<String>>> {
    Ok(Json(state.roles.role_permissions(&ctx, role_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub permission: String,
}

async fn grant_permission(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path(role_id): Path<i32>,
    Json(body): Json<GrantRequest>,
) -> WebResult<Json<Value>> {
    let granted = state
        .roles
        .grant_permission(&ctx, role_id, &body.permission)
        .await?;
    Ok(Json(json!({ "granted": granted })))
}

async fn revoke_permission(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Path((role_id, permission)): Path<(i32, String)>,
) -> WebResult<Json<Value>> {
    let revoked = state
        .roles
        .revoke_permission(&ctx, role_id, &permission)
        .await?;
    Ok(Json(json!({ "revoked": revoked })))
}

#[derive(Debug, Deserialize)]
pub struct NewPermissionRequest {
    pub resource: String,
    pub action: String,
}

async fn create_permission(
    State(state): State<AdminState>,
    CurrentUser(ctx): CurrentUser,
    Json(body): Json<NewPermissionRequest>,
) -> WebResult<(StatusCode, Json<Permission>)> {
    let permission = state
        .roles
        .create_permission(&ctx, &body.resource, &body.action)
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}
