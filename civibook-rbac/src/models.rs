//! Data models for RBAC system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RbacError, RbacResult};

/// Account as seen by the authorization core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub is_active: bool,
    pub is_verified: bool,
    /// System users implicitly hold every admin level and are protected from deletion
    pub is_system_user: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new active, verified user
    pub fn new(id: i32, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            is_active: true,
            is_verified: true,
            is_system_user: false,
            created_at: Utc::now(),
        }
    }

    /// Create a system user
    pub fn system(id: i32, email: impl Into<String>) -> Self {
        Self {
            is_system_user: true,
            ..Self::new(id, email)
        }
    }
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Identity fields of system roles are editable by system admins only
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Role {
    /// Create a new role
    pub fn new(name: impl Into<String>, is_system: bool) -> Self {
        Self {
            id: 0, // Will be set by the store
            name: name.into(),
            display_name: None,
            description: None,
            is_system,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Permission definition, unique by `resource:action`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i32,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

impl Permission {
    /// Create a new permission
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: 0, // Will be set by the store
            resource: resource.into(),
            action: action.into(),
            description: None,
        }
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey {
            resource: self.resource.clone(),
            action: self.action.clone(),
        }
    }

    /// Derived unique name
    pub fn name(&self) -> String {
        self.key().to_string()
    }
}

/// Parsed `resource:action` pair
///
/// The global wildcard is written `*` and parses to resource `*`, action `*`.
/// Any other pair with a `*` resource keeps both parts when rendered, so it
/// never widens into the global wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn is_global_wildcard(&self) -> bool {
        self.resource == "*" && self.action == "*"
    }

    pub fn is_resource_wildcard(&self) -> bool {
        self.resource != "*" && self.action == "*"
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}:{}", self.resource, self.action)
        }
    }
}

impl FromStr for PermissionKey {
    type Err = RbacError;

    fn from_str(s: &str) -> RbacResult<Self> {
        if s == "*" {
            return Ok(Self::new("*", "*"));
        }

        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| RbacError::invalid_permission(s, "expected 'resource:action'"))?;

        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };

        if !valid(resource) {
            return Err(RbacError::invalid_permission(s, "invalid resource"));
        }
        if action != "*" && !valid(action) {
            return Err(RbacError::invalid_permission(s, "invalid action"));
        }

        Ok(Self::new(resource, action))
    }
}

/// User role assignment
///
/// At most one row exists per `(user_id, role_id)`. Revocation and expiry never
/// delete the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: i32,
    pub user_id: i32,
    pub role_id: i32,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl RoleAssignment {
    /// Create a new user role assignment
    pub fn new(
        user_id: i32,
        role_id: i32,
        assigned_by: Option<i32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: 0, // Will be set by the store
            user_id,
            role_id,
            assigned_at: Utc::now(),
            assigned_by,
            expires_at,
            is_active: true,
        }
    }

    /// Check whether the assignment contributes to resolution at `now`
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Role to permission grant; grants are additive only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub role_id: i32,
    pub permission_id: i32,
    pub granted_at: DateTime<Utc>,
}

/// Sort direction for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = RbacError;

    fn from_str(s: &str) -> RbacResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(RbacError::InvalidSortField {
                field: s.to_string(),
                allowed: vec!["asc".to_string(), "desc".to_string()],
            }),
        }
    }
}

/// Whitelisted sort fields for user listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSortField {
    #[default]
    Id,
    Email,
    CreatedAt,
}

impl UserSortField {
    const ALL: [(&'static str, UserSortField); 3] = [
        ("id", UserSortField::Id),
        ("email", UserSortField::Email),
        ("created_at", UserSortField::CreatedAt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserSortField::Id => "id",
            UserSortField::Email => "email",
            UserSortField::CreatedAt => "created_at",
        }
    }
}

impl FromStr for UserSortField {
    type Err = RbacError;

    fn from_str(s: &str) -> RbacResult<Self> {
        Self::ALL
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, field)| *field)
            .ok_or_else(|| RbacError::InvalidSortField {
                field: s.to_string(),
                allowed: Self::ALL.iter().map(|(name, _)| name.to_string()).collect(),
            })
    }
}

/// Whitelisted sort fields for role listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSortField {
    #[default]
    Id,
    Name,
    CreatedAt,
}

impl RoleSortField {
    const ALL: [(&'static str, RoleSortField); 3] = [
        ("id", RoleSortField::Id),
        ("name", RoleSortField::Name),
        ("created_at", RoleSortField::CreatedAt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleSortField::Id => "id",
            RoleSortField::Name => "name",
            RoleSortField::CreatedAt => "created_at",
        }
    }
}

impl FromStr for RoleSortField {
    type Err = RbacError;

    fn from_str(s: &str) -> RbacResult<Self> {
        Self::ALL
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, field)| *field)
            .ok_or_else(|| RbacError::InvalidSortField {
                field: s.to_string(),
                allowed: Self::ALL.iter().map(|(name, _)| name.to_string()).collect(),
            })
    }
}

/// Filters and ordering for user listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuery {
    pub is_active: Option<bool>,
    pub is_system_user: Option<bool>,
    pub email_contains: Option<String>,
    pub sort: UserSortField,
    pub order: SortOrder,
    pub offset: u64,
    pub limit: u64,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            is_active: None,
            is_system_user: None,
            email_contains: None,
            sort: UserSortField::default(),
            order: SortOrder::default(),
            offset: 0,
            limit: 50,
        }
    }
}

/// Filters and ordering for role listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleQuery {
    pub include_inactive: bool,
    pub sort: RoleSortField,
    pub order: SortOrder,
}
