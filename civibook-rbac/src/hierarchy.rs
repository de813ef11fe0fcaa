//! Admin hierarchy policy
//!
//! Three ordered levels, `admin < super_admin < system_admin`. A higher level
//! satisfies every lower one, and `is_system_user` implies `system_admin`
//! regardless of role rows. The policy is built once from configuration and is
//! read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::AuthContext;
use crate::config::AdminPolicyConfig;
use crate::error::{RbacError, RbacResult};
use crate::models::User;

pub const ADMIN_ROLE: &str = "admin";
pub const SUPER_ADMIN_ROLE: &str = "super_admin";
pub const SYSTEM_ADMIN_ROLE: &str = "system_admin";

/// Roles that can never be stripped from a system user
pub const PROTECTED_SYSTEM_ROLES: [&str; 2] = [SUPER_ADMIN_ROLE, SYSTEM_ADMIN_ROLE];

/// Permissions that require `super_admin` instead of a plain grant
pub const SUPER_ADMIN_PERMISSIONS: [&str; 10] = [
    "users:delete",
    "users:bulk_update",
    "users:bulk_delete",
    "roles:create",
    "roles:update",
    "roles:delete",
    "permissions:create",
    "permissions:update",
    "permissions:delete",
    "permissions:assign",
];

/// Permissions that require `system_admin`
pub const SYSTEM_ADMIN_PERMISSIONS: [&str; 4] = [
    "system:config",
    "system:maintenance",
    "system:backup",
    "system:restore",
];

/// Admin level, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    Admin,
    SuperAdmin,
    SystemAdmin,
}

impl AdminLevel {
    pub fn role_name(&self) -> &'static str {
        match self {
            AdminLevel::Admin => ADMIN_ROLE,
            AdminLevel::SuperAdmin => SUPER_ADMIN_ROLE,
            AdminLevel::SystemAdmin => SYSTEM_ADMIN_ROLE,
        }
    }

    pub fn from_role_name(role: &str) -> Option<Self> {
        match role {
            ADMIN_ROLE => Some(AdminLevel::Admin),
            SUPER_ADMIN_ROLE => Some(AdminLevel::SuperAdmin),
            SYSTEM_ADMIN_ROLE => Some(AdminLevel::SystemAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role_name())
    }
}

/// Decides capability questions that are not plain permission lookups
#[derive(Debug, Clone, Default)]
pub struct AdminHierarchyPolicy {
    allow_admin_to_create_admins: bool,
}

impl AdminHierarchyPolicy {
    pub fn new(config: &AdminPolicyConfig) -> Self {
        Self {
            allow_admin_to_create_admins: config.allow_admin_to_create_admins,
        }
    }

    pub fn allows_admin_to_create_admins(&self) -> bool {
        self.allow_admin_to_create_admins
    }

    /// Highest level the caller holds, if any
    pub fn level(&self, ctx: &AuthContext) -> Option<AdminLevel> {
        if ctx.is_system_user() || ctx.has_role(SYSTEM_ADMIN_ROLE) {
            Some(AdminLevel::SystemAdmin)
        } else if ctx.has_role(SUPER_ADMIN_ROLE) {
            Some(AdminLevel::SuperAdmin)
        } else if ctx.has_role(ADMIN_ROLE) {
            Some(AdminLevel::Admin)
        } else {
            None
        }
    }

    pub fn satisfies(&self, ctx: &AuthContext, required: AdminLevel) -> bool {
        self.level(ctx).is_some_and(|level| level >= required)
    }

    pub fn is_admin(&self, ctx: &AuthContext) -> bool {
        self.satisfies(ctx, AdminLevel::Admin)
    }

    pub fn is_super_admin(&self, ctx: &AuthContext) -> bool {
        self.satisfies(ctx, AdminLevel::SuperAdmin)
    }

    pub fn is_system_admin(&self, ctx: &AuthContext) -> bool {
        self.satisfies(ctx, AdminLevel::SystemAdmin)
    }

    /// Any admin may modify a regular user; only system admins may modify system users
    pub fn can_modify_user(&self, ctx: &AuthContext, target: &User) -> bool {
        if target.is_system_user {
            self.is_system_admin(ctx)
        } else {
            self.is_admin(ctx)
        }
    }

    /// Minimum level needed to grant or revoke `role_name`
    pub fn level_to_assign(&self, role_name: &str) -> AdminLevel {
        match role_name {
            SYSTEM_ADMIN_ROLE => AdminLevel::SystemAdmin,
            SUPER_ADMIN_ROLE => AdminLevel::SuperAdmin,
            ADMIN_ROLE if !self.allow_admin_to_create_admins => AdminLevel::SuperAdmin,
            _ => AdminLevel::Admin,
        }
    }

    pub fn can_assign_role(&self, ctx: &AuthContext, role_name: &str) -> bool {
        self.satisfies(ctx, self.level_to_assign(role_name))
    }

    pub fn is_super_admin_required(&self, permission: &str) -> bool {
        SUPER_ADMIN_PERMISSIONS.contains(&permission)
    }

    pub fn is_system_admin_required(&self, permission: &str) -> bool {
        SYSTEM_ADMIN_PERMISSIONS.contains(&permission)
    }

    /// Hierarchy level that replaces a plain check for `permission`, system level first
    pub fn level_for_permission(&self, permission: &str) -> Option<AdminLevel> {
        if self.is_system_admin_required(permission) {
            Some(AdminLevel::SystemAdmin)
        } else if self.is_super_admin_required(permission) {
            Some(AdminLevel::SuperAdmin)
        } else {
            None
        }
    }

    pub fn require_level(
        &self,
        ctx: &AuthContext,
        required: AdminLevel,
        reason: impl Into<String>,
    ) -> RbacResult<()> {
        if self.satisfies(ctx, required) {
            Ok(())
        } else {
            Err(RbacError::level_required(required, ctx.user_id(), reason))
        }
    }

    pub fn require_can_modify(&self, ctx: &AuthContext, target: &User) -> RbacResult<()> {
        if self.can_modify_user(ctx, target) {
            return Ok(());
        }
        if target.is_system_user {
            Err(RbacError::SystemUserProtected {
                user_id: ctx.user_id(),
                target_id: target.id,
                reason: "only system administrators may modify system users".to_string(),
            })
        } else {
            Err(RbacError::level_required(
                AdminLevel::Admin,
                ctx.user_id(),
                format!("modifying user {}", target.id),
            ))
        }
    }

    pub fn require_can_assign(&self, ctx: &AuthContext, role_name: &str) -> RbacResult<()> {
        let required = self.level_to_assign(role_name);
        self.require_level(ctx, required, format!("assigning role '{role_name}'"))
    }
}
