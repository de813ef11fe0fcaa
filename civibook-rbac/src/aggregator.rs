//! Permission aggregation
//!
//! Resolves the roles and permission names reachable from a user's effective
//! assignments. An assignment is effective when it is active, not expired and
//! points at an active role. Grants are purely additive, so adding an effective
//! assignment can never shrink the result.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::RbacResult;
use crate::models::Role;
use crate::permissions::EffectivePermissions;
use crate::store::RbacStore;

/// Roles and permissions effective for a user at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAccess {
    pub roles: BTreeSet<String>,
    pub permissions: EffectivePermissions,
}

/// Resolves effective permissions from the store
#[derive(Clone)]
pub struct PermissionAggregator {
    store: Arc<dyn RbacStore>,
}

impl PermissionAggregator {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, user_id: i32) -> RbacResult<ResolvedAccess> {
        self.resolve_at(user_id, Utc::now()).await
    }

    /// Resolve as of `now`; expiry is evaluated lazily here
    pub async fn resolve_at(&self, user_id: i32, now: DateTime<Utc>) -> RbacResult<ResolvedAccess> {
        let rows = self.store.role_assignments_for_user(user_id).await?;

        let active_roles: BTreeMap<i32, Role> = rows
            .into_iter()
            .filter(|(assignment, role)| assignment.is_effective_at(now) && role.is_active)
            .map(|(_, role)| (role.id, role))
            .collect();

        let grants = try_join_all(
            active_roles
                .keys()
                .map(|role_id| self.store.role_permissions(*role_id)),
        )
        .await?;

        let permissions: EffectivePermissions = grants
            .into_iter()
            .flatten()
            .map(|permission| permission.name())
            .collect();

        let roles: BTreeSet<String> = active_roles.into_values().map(|role| role.name).collect();

        debug!(
            user_id,
            roles = roles.len(),
            permissions = permissions.len(),
            "Resolved effective permissions"
        );

        Ok(ResolvedAccess { roles, permissions })
    }

    pub async fn effective_permissions(&self, user_id: i32) -> RbacResult<EffectivePermissions> {
        Ok(self.resolve(user_id).await?.permissions)
    }
}
