//! Authentication context and utilities

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::User;
use crate::permissions::EffectivePermissions;

/// Authenticated caller for a single request
///
/// Built once per request by the guard pipeline; roles and permissions are the
/// resolved, effective view and are never re-read within the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user: User,

    /// Names of active roles from effective assignments
    pub roles: BTreeSet<String>,

    pub permissions: EffectivePermissions,

    /// Caller-supplied request correlation id, echoed into audit records
    pub correlation_id: Option<String>,
}

impl AuthContext {
    /// Create a context with no roles or permissions
    pub fn new(user: User) -> Self {
        Self {
            user,
            roles: BTreeSet::new(),
            permissions: EffectivePermissions::new(),
            correlation_id: None,
        }
    }

    pub fn user_id(&self) -> i32 {
        self.user.id
    }

    pub fn is_system_user(&self) -> bool {
        self.user.is_system_user
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }

    /// Role names as a sorted list
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().cloned().collect()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Helper to build AuthContext from resolved data
pub struct AuthContextBuilder {
    context: AuthContext,
}

impl AuthContextBuilder {
    /// Start building context for user
    pub fn for_user(user: User) -> Self {
        Self {
            context: AuthContext::new(user),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.context.roles.insert(role.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.context.permissions.insert(permission);
        self
    }

    pub fn with_permissions(mut self, permissions: EffectivePermissions) -> Self {
        self.context.permissions = permissions;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.context.correlation_id = Some(correlation_id.into());
        self
    }

    /// Build the final context
    pub fn build(self) -> AuthContext {
        self.context
    }
}
