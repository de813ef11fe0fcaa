//! Configuration for RBAC system
//!
//! Loaded once at startup and injected into the pipeline and services. The
//! sensitive-permission lists in [`crate::hierarchy`] are compiled in and not
//! configurable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{RbacError, RbacResult};
use crate::hierarchy::{ADMIN_ROLE, SUPER_ADMIN_ROLE, SYSTEM_ADMIN_ROLE};
use crate::models::PermissionKey;

/// RBAC configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    pub admin: AdminPolicyConfig,

    /// Roles seeded at startup, keyed by role name
    pub standard_roles: BTreeMap<String, RoleDefinition>,

    pub audit: AuditConfig,
}

/// Tunable admin hierarchy behavior
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminPolicyConfig {
    /// Whether a plain admin may grant the `admin` role
    pub allow_admin_to_create_admins: bool,
}

/// Audit emission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Emit records for allowed decisions as well as denials
    pub log_grants: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_grants: false,
        }
    }
}

/// Role definition in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub is_system: bool,
}

impl RoleDefinition {
    /// Create a new role definition
    pub fn new(display_name: impl Into<String>, permissions: &[&str], is_system: bool) -> Self {
        Self {
            display_name: display_name.into(),
            description: None,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            is_system,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add permission to role definition
    pub fn add_permission(&mut self, permission: impl Into<String>) {
        let permission = permission.into();
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
    }
}

impl RbacConfig {
    /// Configuration with the standard role catalog
    pub fn with_standard_roles() -> Self {
        Self {
            standard_roles: default_standard_roles(),
            ..Self::default()
        }
    }

    pub fn get_role_definition(&self, role_name: &str) -> Option<&RoleDefinition> {
        self.standard_roles.get(role_name)
    }

    /// Check role names, permission strings and presence of the hierarchy roles
    pub fn validate(&self) -> RbacResult<()> {
        for (name, definition) in &self.standard_roles {
            validate_role_name(name).map_err(|e| RbacError::invalid_config(e.to_string()))?;

            if definition.display_name.trim().is_empty() {
                return Err(RbacError::invalid_config(format!(
                    "role '{name}' has an empty display name"
                )));
            }

            for permission in &definition.permissions {
                permission.parse::<PermissionKey>().map_err(|e| {
                    RbacError::invalid_config(format!("role '{name}': {e}"))
                })?;
            }
        }

        if !self.standard_roles.is_empty() {
            for required in [ADMIN_ROLE, SUPER_ADMIN_ROLE, SYSTEM_ADMIN_ROLE] {
                match self.standard_roles.get(required) {
                    Some(definition) if definition.is_system => {}
                    Some(_) => {
                        return Err(RbacError::invalid_config(format!(
                            "hierarchy role '{required}' must be a system role"
                        )))
                    }
                    None => {
                        return Err(RbacError::invalid_config(format!(
                            "standard roles must include '{required}'"
                        )))
                    }
                }
            }
        }

        Ok(())
    }
}

static ROLE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("role name pattern compiles"));

/// Validate role name: non-empty, at most 100 characters, `[A-Za-z0-9_-]`
pub fn validate_role_name(role_name: &str) -> RbacResult<()> {
    let invalid = |message: &str| RbacError::InvalidRoleName {
        name: role_name.to_string(),
        message: message.to_string(),
    };

    if role_name.is_empty() {
        return Err(invalid("Role name cannot be empty"));
    }

    if role_name.len() > 100 {
        return Err(invalid("Role name cannot exceed 100 characters"));
    }

    if !ROLE_NAME_PATTERN.is_match(role_name) {
        return Err(invalid(
            "Role name can only contain alphanumeric characters, underscores, and hyphens",
        ));
    }

    Ok(())
}

fn default_standard_roles() -> BTreeMap<String, RoleDefinition> {
    let mut roles = BTreeMap::new();

    roles.insert(
        SYSTEM_ADMIN_ROLE.to_string(),
        RoleDefinition::new("System Administrator", &["*"], true)
            .with_description("Unrestricted access including system maintenance"),
    );

    roles.insert(
        SUPER_ADMIN_ROLE.to_string(),
        RoleDefinition::new(
            "Super Administrator",
            &[
                "users:*",
                "roles:*",
                "permissions:*",
                "appointments:*",
                "offices:*",
                "system:read",
            ],
            true,
        )
        .with_description("Full user and role administration"),
    );

    roles.insert(
        ADMIN_ROLE.to_string(),
        RoleDefinition::new(
            "Administrator",
            &[
                "users:list",
                "users:read",
                "users:create",
                "users:update",
                "roles:list",
                "roles:read",
                "roles:assign",
                "permissions:list",
                "appointments:*",
                "offices:*",
            ],
            true,
        )
        .with_description("Day-to-day administration of citizens and staff"),
    );

    roles.insert(
        "staff".to_string(),
        RoleDefinition::new(
            "Office Staff",
            &[
                "appointments:list",
                "appointments:read",
                "appointments:update",
                "offices:read",
                "users:read",
            ],
            false,
        ),
    );

    roles.insert(
        "citizen".to_string(),
        RoleDefinition::new(
            "Citizen",
            &[
                "appointments:create",
                "appointments:read_own",
                "appointments:cancel_own",
                "offices:read",
            ],
            false,
        ),
    );

    roles
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix; empty means unprefixed names
    prefix: String,
}

impl ConfigLoader {
    /// Create a loader reading unprefixed variables such as `ALLOW_ADMIN_TO_CREATE_ADMINS`
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Standard catalog plus environment overrides
    pub fn from_env(&self) -> RbacResult<RbacConfig> {
        let mut config = RbacConfig::with_standard_roles();
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML, then apply environment overrides
    pub fn from_yaml_str(&self, content: &str) -> RbacResult<RbacConfig> {
        let mut config: RbacConfig = serde_yaml::from_str(content)
            .map_err(|e| RbacError::invalid_config(format!("Failed to parse config: {e}")))?;
        if config.standard_roles.is_empty() {
            config.standard_roles = default_standard_roles();
        }
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> RbacResult<RbacConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RbacError::invalid_config(format!("Failed to read {}: {e}", path.display()))
        })?;
        self.from_yaml_str(&content)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> RbacResult<RbacConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut RbacConfig) -> RbacResult<()> {
        if let Ok(value) = self.get_env_var("ALLOW_ADMIN_TO_CREATE_ADMINS") {
            config.admin.allow_admin_to_create_admins = parse_bool(&value).ok_or_else(|| {
                RbacError::invalid_config(format!("Invalid ALLOW_ADMIN_TO_CREATE_ADMINS: {value}"))
            })?;
        }

        if let Ok(value) = self.get_env_var("AUDIT_ENABLED") {
            config.audit.enabled = parse_bool(&value).ok_or_else(|| {
                RbacError::invalid_config(format!("Invalid AUDIT_ENABLED: {value}"))
            })?;
        }

        if let Ok(value) = self.get_env_var("AUDIT_LOG_GRANTS") {
            config.audit.log_grants = parse_bool(&value).ok_or_else(|| {
                RbacError::invalid_config(format!("Invalid AUDIT_LOG_GRANTS: {value}"))
            })?;
        }

        Ok(())
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        if self.prefix.is_empty() {
            std::env::var(name)
        } else {
            std::env::var(format!("{}_{}", self.prefix, name))
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
