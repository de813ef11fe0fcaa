//! In-memory store used for tests, demos and local development

use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{RbacStore, StoreError, StoreResult};
use crate::models::{
    Permission, PermissionGrant, Role, RoleAssignment, RoleQuery, RoleSortField, SortOrder, User,
    UserQuery, UserSortField,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, User>,
    roles: BTreeMap<i32, Role>,
    permissions: BTreeMap<i32, Permission>,
    grants: BTreeMap<(i32, i32), PermissionGrant>,
    assignments: BTreeMap<i32, RoleAssignment>,
    next_id: i32,
}

impl Tables {
    fn allocate_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store backed by in-process maps with the same uniqueness rules as the database
#[derive(Default)]
pub struct InMemoryRbacStore {
    tables: RwLock<Tables>,
}

impl InMemoryRbacStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user row, keeping the caller's id
    pub async fn add_user(&self, user: User) -> User {
        let mut tables = self.tables.write().await;
        tables.next_id = tables.next_id.max(user.id);
        tables.users.insert(user.id, user.clone());
        user
    }

    /// Number of assignment rows for a `(user, role)` pair, whatever their state
    pub async fn assignment_row_count(&self, user_id: i32, role_id: i32) -> usize {
        self.tables
            .read()
            .await
            .assignments
            .values()
            .filter(|a| a.user_id == user_id && a.role_id == role_id)
            .count()
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

#[async_trait]
impl RbacStore for InMemoryRbacStore {
    async fn find_user(&self, user_id: i32) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| query.is_active.map_or(true, |active| u.is_active == active))
            .filter(|u| {
                query
                    .is_system_user
                    .map_or(true, |system| u.is_system_user == system)
            })
            .filter(|u| {
                query
                    .email_contains
                    .as_deref()
                    .map_or(true, |needle| u.email.contains(needle))
            })
            .cloned()
            .collect();

        users.sort_by(|a, b| {
            let ordering = match query.sort {
                UserSortField::Id => a.id.cmp(&b.id),
                UserSortField::Email => a.email.cmp(&b.email),
                UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            directed(ordering, query.order)
        });

        Ok(users
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let row = tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::not_found("user", user.id))?;
        *row = user.clone();
        Ok(row.clone())
    }

    async fn role_assignments_for_user(
        &self,
        user_id: i32,
    ) -> StoreResult<Vec<(RoleAssignment, Role)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| tables.roles.get(&a.role_id).map(|r| (a.clone(), r.clone())))
            .collect())
    }

    async fn role_permissions(&self, role_id: i32) -> StoreResult<Vec<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .grants
            .keys()
            .filter(|(rid, _)| *rid == role_id)
            .filter_map(|(_, pid)| tables.permissions.get(pid).cloned())
            .collect())
    }

    async fn find_role(&self, role_id: i32) -> StoreResult<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .tables
            .read()
            .await
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list_roles(&self, query: &RoleQuery) -> StoreResult<Vec<Role>> {
        let tables = self.tables.read().await;
        let mut roles: Vec<Role> = tables
            .roles
            .values()
            .filter(|r| query.include_inactive || r.is_active)
            .cloned()
            .collect();

        roles.sort_by(|a, b| {
            let ordering = match query.sort {
                RoleSortField::Id => a.id.cmp(&b.id),
                RoleSortField::Name => a.name.cmp(&b.name),
                RoleSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            directed(ordering, query.order)
        });

        Ok(roles)
    }

    async fn insert_role(&self, mut role: Role) -> StoreResult<Role> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        role.id = tables.allocate_id();
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, role: &Role) -> StoreResult<Role> {
        let mut tables = self.tables.write().await;
        if tables
            .roles
            .values()
            .any(|r| r.name == role.name && r.id != role.id)
        {
            return Err(StoreError::conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        let row = tables
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| StoreError::not_found("role", role.id))?;
        *row = role.clone();
        Ok(row.clone())
    }

    async fn delete_role(&self, role_id: i32) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.roles.remove(&role_id).is_none() {
            return Ok(false);
        }
        tables.grants.retain(|(rid, _), _| *rid != role_id);
        tables.assignments.retain(|_, a| a.role_id != role_id);
        Ok(true)
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        Ok(self
            .tables
            .read()
            .await
            .permissions
            .values()
            .find(|p| p.name() == name)
            .cloned())
    }

    async fn insert_permission(&self, mut permission: Permission) -> StoreResult<Permission> {
        let mut tables = self.tables.write().await;
        let name = permission.name();
        if tables.permissions.values().any(|p| p.name() == name) {
            return Err(StoreError::conflict(format!(
                "permission '{name}' already exists"
            )));
        }
        permission.id = tables.allocate_id();
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn grant_permission(&self, role_id: i32, permission_id: i32) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(StoreError::not_found("role", role_id));
        }
        if !tables.permissions.contains_key(&permission_id) {
            return Err(StoreError::not_found("permission", permission_id));
        }
        if tables.grants.contains_key(&(role_id, permission_id)) {
            return Ok(false);
        }
        tables.grants.insert(
            (role_id, permission_id),
            PermissionGrant {
                role_id,
                permission_id,
                granted_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn revoke_permission(&self, role_id: i32, permission_id: i32) -> StoreResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .grants
            .remove(&(role_id, permission_id))
            .is_some())
    }

    async fn find_assignment(
        &self,
        user_id: i32,
        role_id: i32,
    ) -> StoreResult<Option<RoleAssignment>> {
        Ok(self
            .tables
            .read()
            .await
            .assignments
            .values()
            .find(|a| a.user_id == user_id && a.role_id == role_id)
            .cloned())
    }

    async fn insert_assignment(
        &self,
        mut assignment: RoleAssignment,
    ) -> StoreResult<RoleAssignment> {
        let mut tables = self.tables.write().await;
        if tables
            .assignments
            .values()
            .any(|a| a.user_id == assignment.user_id && a.role_id == assignment.role_id)
        {
            return Err(StoreError::conflict(format!(
                "user {} already has an assignment for role {}",
                assignment.user_id, assignment.role_id
            )));
        }
        if !tables.roles.contains_key(&assignment.role_id) {
            return Err(StoreError::not_found("role", assignment.role_id));
        }
        assignment.id = tables.allocate_id();
        tables.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn update_assignment(
        &self,
        assignment: &RoleAssignment,
    ) -> StoreResult<RoleAssignment> {
        let mut tables = self.tables.write().await;
        let row = tables
            .assignments
            .get_mut(&assignment.id)
            .ok_or_else(|| StoreError::not_found("role_assignment", assignment.id))?;
        *row = assignment.clone();
        Ok(row.clone())
    }

    async fn deactivate_user(&self, user_id: i32) -> StoreResult<(User, usize)> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.is_active = false;
        let user = user.clone();

        let mut disabled = 0;
        for assignment in tables.assignments.values_mut() {
            if assignment.user_id == user_id && assignment.is_active {
                assignment.is_active = false;
                disabled += 1;
            }
        }
        Ok((user, disabled))
    }
}
