//! Role catalog management
//!
//! Creating, editing and removing roles and their permission grants. Every
//! mutation is gated through the [`Authorizer`]; the permissions involved are
//! on the super-admin list, so a plain permission grant alone never suffices.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditEventType};
use crate::auth::AuthContext;
use crate::config::{validate_role_name, RbacConfig};
use crate::error::{RbacError, RbacResult};
use crate::guard::{Authorizer, Requirement};
use crate::hierarchy::AdminLevel;
use crate::models::{Permission, PermissionKey, Role, RoleQuery};
use crate::store::RbacStore;

/// Input for a new role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

impl NewRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub is_system: Option<bool>,
    pub is_active: Option<bool>,
}

impl RoleUpdate {
    /// Whether applying the update needs `system_admin`
    ///
    /// Flipping `is_system` on any role, or renaming or deactivating a system
    /// role, is reserved to system administrators.
    fn needs_system_admin(&self, role: &Role) -> bool {
        if self.is_system.is_some_and(|flag| flag != role.is_system) {
            return true;
        }
        role.is_system
            && (self.name.as_ref().is_some_and(|name| *name != role.name)
                || (role.is_active && self.is_active == Some(false)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RoleDeletion {
    /// System roles are only switched off
    Deactivated { role: Role },
    Deleted { role_id: i32 },
}

/// Manages roles, permissions and grants in the store
#[derive(Clone)]
pub struct RoleManager {
    store: Arc<dyn RbacStore>,
    authorizer: Authorizer,
    config: Arc<RbacConfig>,
}

impl RoleManager {
    pub fn new(
        store: Arc<dyn RbacStore>,
        authorizer: Authorizer,
        config: Arc<RbacConfig>,
    ) -> Self {
        Self {
            store,
            authorizer,
            config,
        }
    }

    /// Create the configured standard roles, their permissions and grants
    ///
    /// Safe to run on every start; existing rows are left as they are.
    pub async fn seed_standard_roles(&self) -> RbacResult<Vec<Role>> {
        let mut seeded = Vec::with_capacity(self.config.standard_roles.len());

        for (name, definition) in &self.config.standard_roles {
            let role = match self.store.find_role_by_name(name).await? {
                Some(role) => role,
                None => {
                    let mut role = Role::new(name.clone(), definition.is_system);
                    role.display_name = Some(definition.display_name.clone());
                    role.description = definition.description.clone();
                    let role = self.store.insert_role(role).await?;
                    info!(role = %role.name, "Seeded standard role");
                    role
                }
            };

            for permission in &definition.permissions {
                let key: PermissionKey = permission.parse()?;
                let permission = self.ensure_permission(&key).await?;
                self.store.grant_permission(role.id, permission.id).await?;
            }

            seeded.push(role);
        }

        debug!(count = seeded.len(), "Standard roles seeded");
        Ok(seeded)
    }

    pub async fn create_role(&self, caller: &AuthContext, new_role: NewRole) -> RbacResult<Role> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:create"))?;
        validate_role_name(&new_role.name)?;
        if new_role.is_system {
            self.authorizer.policy().require_level(
                caller,
                AdminLevel::SystemAdmin,
                "creating a system role",
            )?;
        }

        let mut role = Role::new(new_role.name, new_role.is_system);
        role.display_name = new_role.display_name;
        role.description = new_role.description;
        let role = self.store.insert_role(role).await?;

        info!(user_id = caller.user_id(), role = %role.name, "Role created");
        self.changed(caller, &role, "created");
        Ok(role)
    }

    pub async fn update_role(
        &self,
        caller: &AuthContext,
        role_id: i32,
        update: RoleUpdate,
    ) -> RbacResult<Role> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:update"))?;
        let mut role = self.role(role_id).await?;

        if update.needs_system_admin(&role) {
            self.authorizer.policy().require_level(
                caller,
                AdminLevel::SystemAdmin,
                format!("changing protected fields of role '{}'", role.name),
            )?;
        }

        if let Some(name) = update.name {
            validate_role_name(&name)?;
            role.name = name;
        }
        if let Some(display_name) = update.display_name {
            role.display_name = Some(display_name);
        }
        if let Some(description) = update.description {
            role.description = Some(description);
        }
        if let Some(is_system) = update.is_system {
            role.is_system = is_system;
        }
        if let Some(is_active) = update.is_active {
            role.is_active = is_active;
        }

        let role = self.store.update_role(&role).await?;
        info!(user_id = caller.user_id(), role = %role.name, "Role updated");
        self.changed(caller, &role, "updated");
        Ok(role)
    }

    /// Deactivate a system role, hard delete any other
    ///
    /// System roles can only be deactivated by a system admin.
    pub async fn delete_role(
        &self,
        caller: &AuthContext,
        role_id: i32,
    ) -> RbacResult<RoleDeletion> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:delete"))?;
        let mut role = self.role(role_id).await?;

        let deletion = if role.is_system {
            self.authorizer.policy().require_level(
                caller,
                AdminLevel::SystemAdmin,
                format!("deactivating system role '{}'", role.name),
            )?;
            role.is_active = false;
            let role = self.store.update_role(&role).await?;
            self.changed(caller, &role, "deactivated");
            RoleDeletion::Deactivated { role }
        } else {
            self.store.delete_role(role.id).await?;
            self.changed(caller, &role, "deleted");
            RoleDeletion::Deleted { role_id: role.id }
        };

        info!(user_id = caller.user_id(), role_id, "Role removed");
        Ok(deletion)
    }

    pub async fn create_permission(
        &self,
        caller: &AuthContext,
        resource: &str,
        action: &str,
    ) -> RbacResult<Permission> {
        self.authorizer
            .authorize(caller, &Requirement::permission("permissions:create"))?;
        let key: PermissionKey = format!("{resource}:{action}").parse()?;
        let permission = self
            .store
            .insert_permission(Permission::new(key.resource, key.action))
            .await?;
        info!(user_id = caller.user_id(), permission = %permission.name(), "Permission created");
        Ok(permission)
    }

    /// Returns false when the role already had the permission
    pub async fn grant_permission(
        &self,
        caller: &AuthContext,
        role_id: i32,
        permission_name: &str,
    ) -> RbacResult<bool> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:update"))?;
        let role = self.role(role_id).await?;
        let permission = self.permission(permission_name).await?;

        let granted = self.store.grant_permission(role.id, permission.id).await?;
        if granted {
            info!(
                user_id = caller.user_id(),
                role = %role.name,
                permission = permission_name,
                "Permission granted"
            );
            self.changed(caller, &role, "permission_granted");
        }
        Ok(granted)
    }

    pub async fn revoke_permission(
        &self,
        caller: &AuthContext,
        role_id: i32,
        permission_name: &str,
    ) -> RbacResult<bool> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:update"))?;
        let role = self.role(role_id).await?;
        let permission = self.permission(permission_name).await?;

        let revoked = self.store.revoke_permission(role.id, permission.id).await?;
        if revoked {
            info!(
                user_id = caller.user_id(),
                role = %role.name,
                permission = permission_name,
                "Permission revoked"
            );
            self.changed(caller, &role, "permission_revoked");
        }
        Ok(revoked)
    }

    pub async fn list_roles(
        &self,
        caller: &AuthContext,
        query: &RoleQuery,
    ) -> RbacResult<Vec<Role>> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:list"))?;
        Ok(self.store.list_roles(query).await?)
    }

    /// Permission names granted directly to a role
    pub async fn role_permissions(
        &self,
        caller: &AuthContext,
        role_id: i32,
    ) -> RbacResult<Vec<String>> {
        self.authorizer
            .authorize(caller, &Requirement::permission("roles:read"))?;
        let role = self.role(role_id).await?;
        let mut names: Vec<String> = self
            .store
            .role_permissions(role.id)
            .await?
            .iter()
            .map(Permission::name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn role(&self, role_id: i32) -> RbacResult<Role> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound {
                role_name: role_id.to_string(),
            })
    }

    async fn permission(&self, name: &str) -> RbacResult<Permission> {
        let key: PermissionKey = name.parse()?;
        self.store
            .find_permission_by_name(&key.to_string())
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound {
                permission: name.to_string(),
            })
    }

    async fn ensure_permission(&self, key: &PermissionKey) -> RbacResult<Permission> {
        match self.store.find_permission_by_name(&key.to_string()).await? {
            Some(permission) => Ok(permission),
            None => Ok(self
                .store
                .insert_permission(Permission::new(key.resource.clone(), key.action.clone()))
                .await?),
        }
    }

    fn changed(&self, caller: &AuthContext, role: &Role, change: &str) {
        self.authorizer.audit().emit(
            AuditEvent::granted(AuditEventType::RoleChanged)
                .with_user(caller.user_id())
                .with_correlation_id(caller.correlation_id.as_deref())
                .with_context("role", json!(role.name))
                .with_context("role_id", json!(role.id))
                .with_context("change", json!(change)),
        );
    }
}
