//! Guarded user administration
//!
//! Every operation that targets another account goes through
//! [`Authorizer::authorize_target`], so self-modification and system-user
//! protection apply the same way everywhere.

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::aggregator::{PermissionAggregator, ResolvedAccess};
use crate::audit::{AuditEvent, AuditEventType};
use crate::auth::AuthContext;
use crate::error::{RbacError, RbacResult};
use crate::guard::{Authorizer, Requirement};
use crate::models::{User, UserQuery};
use crate::store::RbacStore;

#[derive(Clone)]
pub struct UserAdministration {
    store: Arc<dyn RbacStore>,
    aggregator: PermissionAggregator,
    authorizer: Authorizer,
}

impl UserAdministration {
    pub fn new(store: Arc<dyn RbacStore>, authorizer: Authorizer) -> Self {
        Self {
            aggregator: PermissionAggregator::new(store.clone()),
            store,
            authorizer,
        }
    }

    pub async fn set_active(
        &self,
        caller: &AuthContext,
        user_id: i32,
        active: bool,
    ) -> RbacResult<User> {
        let mut target = self.target(user_id).await?;
        self.authorizer.authorize_target(
            caller,
            &Requirement::permission("users:update"),
            &target,
            if active { "activate" } else { "deactivate" },
        )?;

        target.is_active = active;
        let user = self.store.update_user(&target).await?;
        info!(
            user_id = caller.user_id(),
            target_id = user.id,
            active,
            "User activation changed"
        );
        self.changed(caller, &user, json!({ "is_active": active }));
        Ok(user)
    }

    pub async fn set_verified(
        &self,
        caller: &AuthContext,
        user_id: i32,
        verified: bool,
    ) -> RbacResult<User> {
        let mut target = self.target(user_id).await?;
        self.authorizer.authorize_target(
            caller,
            &Requirement::permission("users:update"),
            &target,
            if verified { "verify" } else { "unverify" },
        )?;

        target.is_verified = verified;
        let user = self.store.update_user(&target).await?;
        info!(
            user_id = caller.user_id(),
            target_id = user.id,
            verified,
            "User verification changed"
        );
        self.changed(caller, &user, json!({ "is_verified": verified }));
        Ok(user)
    }

    /// Soft delete: deactivate the account and switch off every assignment
    pub async fn delete_user(&self, caller: &AuthContext, user_id: i32) -> RbacResult<User> {
        let target = self.target(user_id).await?;
        self.authorizer.authorize_target(
            caller,
            &Requirement::permission("users:delete"),
            &target,
            "delete",
        )?;
        if target.is_system_user {
            let err = RbacError::SystemUserProtected {
                user_id: caller.user_id(),
                target_id: target.id,
                reason: "system users cannot be deleted".to_string(),
            };
            self.authorizer.audit().emit(
                AuditEvent::denied(AuditEventType::UserChanged, &err)
                    .with_user(caller.user_id())
                    .with_target(target.id)
                    .with_correlation_id(caller.correlation_id.as_deref()),
            );
            return Err(err);
        }

        let (user, disabled) = self.store.deactivate_user(target.id).await?;
        info!(
            user_id = caller.user_id(),
            target_id = user.id,
            assignments_disabled = disabled,
            "User deleted"
        );
        self.changed(
            caller,
            &user,
            json!({ "deleted": true, "assignments_disabled": disabled }),
        );
        Ok(user)
    }

    pub async fn list_users(
        &self,
        caller: &AuthContext,
        query: &UserQuery,
    ) -> RbacResult<Vec<User>> {
        self.authorizer
            .authorize(caller, &Requirement::permission("users:list"))?;
        Ok(self.store.list_users(query).await?)
    }

    /// Effective roles and permissions of any user
    pub async fn user_permissions(
        &self,
        caller: &AuthContext,
        user_id: i32,
    ) -> RbacResult<ResolvedAccess> {
        self.authorizer
            .authorize(caller, &Requirement::permission("users:read"))?;
        let target = self.target(user_id).await?;
        self.aggregator.resolve(target.id).await
    }

    async fn target(&self, user_id: i32) -> RbacResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(RbacError::UserNotFound { user_id })
    }

    fn changed(&self, caller: &AuthContext, target: &User, change: serde_json::Value) {
        self.authorizer.audit().emit(
            AuditEvent::granted(AuditEventType::UserChanged)
                .with_user(caller.user_id())
                .with_target(target.id)
                .with_correlation_id(caller.correlation_id.as_deref())
                .with_context("change", change),
        );
    }
}
