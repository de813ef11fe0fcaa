//! Role assignment workflow
//!
//! Assignments are upserted per `(user, role)`: an existing row is reactivated
//! in place instead of inserting a second one. Revocation only flips
//! `is_active` so the row stays for the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditEventType};
use crate::auth::AuthContext;
use crate::error::{RbacError, RbacResult};
use crate::guard::{Authorizer, Requirement};
use crate::hierarchy::PROTECTED_SYSTEM_ROLES;
use crate::models::{Role, RoleAssignment, User};
use crate::store::{RbacStore, StoreError};

/// Permission checked before any grant or revoke
pub const ASSIGN_PERMISSION: &str = "roles:assign";

/// Behaviour when the user already holds the role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    /// Refresh the existing row
    #[default]
    Upsert,
    /// Fail with `RoleAssignmentConflict`
    CreateOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignOptions {
    pub expires_at: Option<DateTime<Utc>>,
    pub mode: AssignMode,
}

impl AssignOptions {
    pub fn expiring_at(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    pub fn create_only() -> Self {
        Self {
            mode: AssignMode::CreateOnly,
            ..Self::default()
        }
    }
}

/// What an assignment did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Created,
    /// A revoked or expired row was switched back on
    Reactivated,
    /// The role was already effective; timestamps were refreshed
    Refreshed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub assignment: RoleAssignment,
    pub outcome: AssignmentOutcome,
}

/// Grants and revokes roles on behalf of an authenticated caller
#[derive(Clone)]
pub struct RoleAssignmentService {
    store: Arc<dyn RbacStore>,
    authorizer: Authorizer,
}

impl RoleAssignmentService {
    pub fn new(store: Arc<dyn RbacStore>, authorizer: Authorizer) -> Self {
        Self { store, authorizer }
    }

    pub async fn assign_role(
        &self,
        caller: &AuthContext,
        user_id: i32,
        role_name: &str,
        options: AssignOptions,
    ) -> RbacResult<AssignmentResult> {
        let role = self.active_role(role_name).await?;
        let target = self.target_user(user_id).await?;

        self.authorize(caller, &target, &role, "assign_role", AuditEventType::RoleAssigned)?;

        let now = Utc::now();
        let result = match self.store.find_assignment(target.id, role.id).await? {
            Some(mut existing) => {
                let outcome = if existing.is_effective_at(now) {
                    if options.mode == AssignMode::CreateOnly {
                        return Err(RbacError::RoleAssignmentConflict {
                            user_id: target.id,
                            role_name: role.name,
                        });
                    }
                    AssignmentOutcome::Refreshed
                } else {
                    AssignmentOutcome::Reactivated
                };

                existing.is_active = true;
                existing.expires_at = options.expires_at;
                existing.assigned_at = now;
                existing.assigned_by = Some(caller.user_id());

                AssignmentResult {
                    assignment: self.store.update_assignment(&existing).await?,
                    outcome,
                }
            }
            None => {
                let assignment = RoleAssignment::new(
                    target.id,
                    role.id,
                    Some(caller.user_id()),
                    options.expires_at,
                );
                match self.store.insert_assignment(assignment).await {
                    Ok(assignment) => AssignmentResult {
                        assignment,
                        outcome: AssignmentOutcome::Created,
                    },
                    // A concurrent assign won the insert
                    Err(StoreError::Conflict { .. }) => {
                        return Err(RbacError::RoleAssignmentConflict {
                            user_id: target.id,
                            role_name: role.name,
                        })
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        info!(
            user_id = caller.user_id(),
            target_id = target.id,
            role = %role.name,
            outcome = ?result.outcome,
            "Role assigned"
        );
        self.authorizer.audit().emit(
            AuditEvent::granted(AuditEventType::RoleAssigned)
                .with_user(caller.user_id())
                .with_target(target.id)
                .with_correlation_id(caller.correlation_id.as_deref())
                .with_context("role", json!(role.name))
                .with_context("outcome", json!(result.outcome))
                .with_context("expires_at", json!(result.assignment.expires_at)),
        );

        Ok(result)
    }

    /// Soft-disable the assignment; `None` when there was nothing active to revoke
    pub async fn revoke_role(
        &self,
        caller: &AuthContext,
        user_id: i32,
        role_name: &str,
    ) -> RbacResult<Option<RoleAssignment>> {
        let role = self
            .store
            .find_role_by_name(role_name)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound {
                role_name: role_name.to_string(),
            })?;
        let target = self.target_user(user_id).await?;

        self.authorize(caller, &target, &role, "revoke_role", AuditEventType::RoleRevoked)?;

        if target.is_system_user && PROTECTED_SYSTEM_ROLES.contains(&role.name.as_str()) {
            let err = RbacError::SystemUserProtected {
                user_id: caller.user_id(),
                target_id: target.id,
                reason: format!("role '{}' cannot be removed from a system user", role.name),
            };
            self.deny(caller, &target, AuditEventType::RoleRevoked, &err);
            return Err(err);
        }

        let mut assignment = match self.store.find_assignment(target.id, role.id).await? {
            Some(assignment) if assignment.is_active => assignment,
            _ => return Ok(None),
        };
        assignment.is_active = false;
        let assignment = self.store.update_assignment(&assignment).await?;

        info!(
            user_id = caller.user_id(),
            target_id = target.id,
            role = %role.name,
            "Role revoked"
        );
        self.authorizer.audit().emit(
            AuditEvent::granted(AuditEventType::RoleRevoked)
                .with_user(caller.user_id())
                .with_target(target.id)
                .with_correlation_id(caller.correlation_id.as_deref())
                .with_context("role", json!(role.name)),
        );

        Ok(Some(assignment))
    }

    /// Self-modification, `roles:assign`, target protection, then the role's own level
    fn authorize(
        &self,
        caller: &AuthContext,
        target: &User,
        role: &Role,
        operation: &str,
        event_type: AuditEventType,
    ) -> RbacResult<()> {
        self.authorizer.authorize_target(
            caller,
            &Requirement::permission(ASSIGN_PERMISSION),
            target,
            operation,
        )?;

        if let Err(err) = self.authorizer.policy().require_can_assign(caller, &role.name) {
            self.deny(caller, target, event_type, &err);
            return Err(err);
        }
        Ok(())
    }

    fn deny(
        &self,
        caller: &AuthContext,
        target: &User,
        event_type: AuditEventType,
        err: &RbacError,
    ) {
        warn!(
            user_id = caller.user_id(),
            target_id = target.id,
            denial = err.kind().code(),
            "Role change denied"
        );
        self.authorizer.audit().emit(
            AuditEvent::denied(event_type, err)
                .with_user(caller.user_id())
                .with_target(target.id)
                .with_correlation_id(caller.correlation_id.as_deref()),
        );
    }

    async fn active_role(&self, role_name: &str) -> RbacResult<Role> {
        match self.store.find_role_by_name(role_name).await? {
            Some(role) if role.is_active => Ok(role),
            _ => Err(RbacError::RoleNotFound {
                role_name: role_name.to_string(),
            }),
        }
    }

    async fn target_user(&self, user_id: i32) -> RbacResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })
    }
}
