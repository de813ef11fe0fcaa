//! Error types for RBAC operations
//!
//! Every authorization failure is a variant of [`RbacError`] carrying structured
//! context. Nothing here knows about HTTP; the web layer maps [`DenialKind`] to
//! status codes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::hierarchy::AdminLevel;
use crate::store::StoreError;

/// Result type for RBAC operations
pub type RbacResult<T> = Result<T, RbacError>;

/// RBAC-specific errors
#[derive(Error, Debug)]
pub enum RbacError {
    /// Missing, malformed or expired credential, or unknown subject
    #[error("Authentication required: {reason}")]
    Unauthenticated { reason: String },

    #[error("User account {user_id} is inactive")]
    AccountInactive { user_id: i32 },

    #[error("User account {user_id} is not verified")]
    AccountUnverified { user_id: i32 },

    /// Effective permission set lacks the required permission or a covering wildcard
    #[error("Permission '{required}' required for user {user_id}")]
    InsufficientPermission {
        user_id: i32,
        required: String,
        granted: Vec<String>,
    },

    #[error("Administrator privileges required for user {user_id}")]
    AdminOnly { user_id: i32, reason: String },

    #[error("Super administrator privileges required for user {user_id}")]
    SuperAdminOnly { user_id: i32, reason: String },

    #[error("System administrator privileges required for user {user_id}")]
    SystemAdminOnly { user_id: i32, reason: String },

    /// Caller targets their own account on an operation that forbids it
    #[error("User {user_id} cannot perform '{operation}' on their own account")]
    SelfModification { user_id: i32, operation: String },

    #[error("System user {target_id} is protected: {reason}")]
    SystemUserProtected {
        user_id: i32,
        target_id: i32,
        reason: String,
    },

    #[error("Role not found: {role_name}")]
    RoleNotFound { role_name: String },

    #[error("Permission not found: {permission}")]
    PermissionNotFound { permission: String },

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: i32 },

    /// The role is already held; callers may treat this as already satisfied
    #[error("User {user_id} already holds role {role_name}")]
    RoleAssignmentConflict { user_id: i32, role_name: String },

    #[error("Invalid permission '{value}': {message}")]
    InvalidPermission { value: String, message: String },

    #[error("Invalid role name '{name}': {message}")]
    InvalidRoleName { name: String, message: String },

    #[error("Invalid sort field '{field}', expected one of: {}", allowed.join(", "))]
    InvalidSortField { field: String, allowed: Vec<String> },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Stable classification of an [`RbacError`], used by audit tooling and the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialKind {
    Unauthenticated,
    AccountInactive,
    AccountUnverified,
    InsufficientPermission,
    AdminOnly,
    SuperAdminOnly,
    SystemAdminOnly,
    SelfModification,
    SystemUserProtected,
    RoleNotFound,
    PermissionNotFound,
    UserNotFound,
    RoleAssignmentConflict,
    InvalidPermission,
    InvalidRoleName,
    InvalidSortField,
    InvalidConfig,
    Store,
}

impl DenialKind {
    /// Error code used in API responses and audit records
    pub fn code(&self) -> &'static str {
        match self {
            DenialKind::Unauthenticated => "UNAUTHENTICATED",
            DenialKind::AccountInactive => "ACCOUNT_INACTIVE",
            DenialKind::AccountUnverified => "ACCOUNT_UNVERIFIED",
            DenialKind::InsufficientPermission => "INSUFFICIENT_PERMISSION",
            DenialKind::AdminOnly => "ADMIN_ONLY",
            DenialKind::SuperAdminOnly => "SUPER_ADMIN_ONLY",
            DenialKind::SystemAdminOnly => "SYSTEM_ADMIN_ONLY",
            DenialKind::SelfModification => "SELF_MODIFICATION",
            DenialKind::SystemUserProtected => "SYSTEM_USER_PROTECTED",
            DenialKind::RoleNotFound => "ROLE_NOT_FOUND",
            DenialKind::PermissionNotFound => "PERMISSION_NOT_FOUND",
            DenialKind::UserNotFound => "USER_NOT_FOUND",
            DenialKind::RoleAssignmentConflict => "ROLE_ASSIGNMENT_CONFLICT",
            DenialKind::InvalidPermission => "INVALID_PERMISSION",
            DenialKind::InvalidRoleName => "INVALID_ROLE_NAME",
            DenialKind::InvalidSortField => "INVALID_SORT_FIELD",
            DenialKind::InvalidConfig => "INVALID_CONFIG",
            DenialKind::Store => "STORE_ERROR",
        }
    }
}

impl RbacError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    /// Create the hierarchy error matching the level that was required
    pub fn level_required(level: AdminLevel, user_id: i32, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match level {
            AdminLevel::Admin => Self::AdminOnly { user_id, reason },
            AdminLevel::SuperAdmin => Self::SuperAdminOnly { user_id, reason },
            AdminLevel::SystemAdmin => Self::SystemAdminOnly { user_id, reason },
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_permission(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPermission {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DenialKind {
        match self {
            Self::Unauthenticated { .. } => DenialKind::Unauthenticated,
            Self::AccountInactive { .. } => DenialKind::AccountInactive,
            Self::AccountUnverified { .. } => DenialKind::AccountUnverified,
            Self::InsufficientPermission { .. } => DenialKind::InsufficientPermission,
            Self::AdminOnly { .. } => DenialKind::AdminOnly,
            Self::SuperAdminOnly { .. } => DenialKind::SuperAdminOnly,
            Self::SystemAdminOnly { .. } => DenialKind::SystemAdminOnly,
            Self::SelfModification { .. } => DenialKind::SelfModification,
            Self::SystemUserProtected { .. } => DenialKind::SystemUserProtected,
            Self::RoleNotFound { .. } => DenialKind::RoleNotFound,
            Self::PermissionNotFound { .. } => DenialKind::PermissionNotFound,
            Self::UserNotFound { .. } => DenialKind::UserNotFound,
            Self::RoleAssignmentConflict { .. } => DenialKind::RoleAssignmentConflict,
            Self::InvalidPermission { .. } => DenialKind::InvalidPermission,
            Self::InvalidRoleName { .. } => DenialKind::InvalidRoleName,
            Self::InvalidSortField { .. } => DenialKind::InvalidSortField,
            Self::InvalidConfig { .. } => DenialKind::InvalidConfig,
            Self::Store(_) => DenialKind::Store,
        }
    }

    /// Check if this error is an authorization decision, not a lookup or
    /// infrastructure failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated { .. }
                | Self::AccountInactive { .. }
                | Self::AccountUnverified { .. }
                | Self::InsufficientPermission { .. }
                | Self::AdminOnly { .. }
                | Self::SuperAdminOnly { .. }
                | Self::SystemAdminOnly { .. }
                | Self::SelfModification { .. }
                | Self::SystemUserProtected { .. }
        )
    }

    pub fn is_hierarchy_denial(&self) -> bool {
        matches!(
            self,
            Self::AdminOnly { .. } | Self::SuperAdminOnly { .. } | Self::SystemAdminOnly { .. }
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RoleNotFound { .. } | Self::PermissionNotFound { .. } | Self::UserNotFound { .. }
        )
    }

    /// A conflict on assignment means the desired state already holds
    pub fn is_already_satisfied(&self) -> bool {
        matches!(self, Self::RoleAssignmentConflict { .. })
    }

    /// Structured context for rendering and auditing
    pub fn context(&self) -> Value {
        match self {
            Self::Unauthenticated { reason } => json!({ "reason": reason }),
            Self::AccountInactive { user_id } | Self::AccountUnverified { user_id } => {
                json!({ "user_id": user_id })
            }
            Self::InsufficientPermission {
                user_id,
                required,
                granted,
            } => json!({
                "user_id": user_id,
                "required_permission": required,
                "granted_permissions": granted,
            }),
            Self::AdminOnly { user_id, reason }
            | Self::SuperAdminOnly { user_id, reason }
            | Self::SystemAdminOnly { user_id, reason } => json!({
                "user_id": user_id,
                "reason": reason,
            }),
            Self::SelfModification { user_id, operation } => json!({
                "user_id": user_id,
                "target_id": user_id,
                "operation": operation,
            }),
            Self::SystemUserProtected {
                user_id,
                target_id,
                reason,
            } => json!({
                "user_id": user_id,
                "target_id": target_id,
                "reason": reason,
            }),
            Self::RoleNotFound { role_name } => json!({ "role": role_name }),
            Self::PermissionNotFound { permission } => json!({ "permission": permission }),
            Self::UserNotFound { user_id } => json!({ "target_id": user_id }),
            Self::RoleAssignmentConflict { user_id, role_name } => json!({
                "target_id": user_id,
                "role": role_name,
            }),
            Self::InvalidPermission { value, message } => json!({
                "value": value,
                "reason": message,
            }),
            Self::InvalidRoleName { name, message } => json!({
                "role": name,
                "reason": message,
            }),
            Self::InvalidSortField { field, allowed } => json!({
                "field": field,
                "allowed": allowed,
            }),
            Self::InvalidConfig { message } => json!({ "reason": message }),
            Self::Store(err) => json!({ "reason": err.to_string() }),
        }
    }
}
