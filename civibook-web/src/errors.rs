//! HTTP mapping of authorization errors
//!
//! [`RbacError`] stays framework-agnostic; this module owns the status codes
//! and the JSON error body. Internal failures are rendered without their
//! message so store details never reach clients.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use civibook_rbac::{RbacError, StoreError};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

/// Web-specific error type for HTTP API operations
#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Rbac(#[from] RbacError),

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

/// Result type for web operations
pub type WebResult<T> = Result<T, WebError>;

/// Stable status for each error kind
pub fn rbac_status(err: &RbacError) -> StatusCode {
    match err {
        RbacError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
        RbacError::AccountInactive { .. }
        | RbacError::AccountUnverified { .. }
        | RbacError::InsufficientPermission { .. }
        | RbacError::AdminOnly { .. }
        | RbacError::SuperAdminOnly { .. }
        | RbacError::SystemAdminOnly { .. }
        | RbacError::SelfModification { .. }
        | RbacError::SystemUserProtected { .. } => StatusCode::FORBIDDEN,
        RbacError::RoleNotFound { .. }
        | RbacError::PermissionNotFound { .. }
        | RbacError::UserNotFound { .. } => StatusCode::NOT_FOUND,
        RbacError::RoleAssignmentConflict { .. } => StatusCode::CONFLICT,
        RbacError::InvalidPermission { .. }
        | RbacError::InvalidRoleName { .. }
        | RbacError::InvalidSortField { .. } => StatusCode::BAD_REQUEST,
        RbacError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
        RbacError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        RbacError::Store(_) | RbacError::InvalidConfig { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        WebError::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WebError::Internal {
            message: message.into(),
        }
    }

    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        WebError::Rbac(RbacError::unauthenticated(reason))
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::Rbac(err) => rbac_status(err),
            WebError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            WebError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            WebError::Rbac(err) => err.kind().code(),
            WebError::BadRequest { .. } => "BAD_REQUEST",
            WebError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Coarse category derived from the status
    pub fn category(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "authentication",
            StatusCode::FORBIDDEN => "authorization",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            StatusCode::BAD_REQUEST => "validation",
            _ => "internal",
        }
    }

    fn context(&self) -> Value {
        match self {
            WebError::Rbac(err) => err.context(),
            WebError::BadRequest { message } => json!({ "reason": message }),
            WebError::Internal { .. } => Value::Null,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (message, context) = if status.is_server_error() {
            error!(error = %self, "Request failed with internal error");
            ("An internal error occurred".to_string(), Value::Null)
        } else {
            (self.to_string(), self.context())
        };

        let body = json!({
            "error": {
                "code": self.error_code(),
                "kind": self.category(),
                "message": message,
                "context": context,
            }
        });

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
