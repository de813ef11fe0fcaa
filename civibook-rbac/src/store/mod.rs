//! Role/permission store contract
//!
//! The store owns rows and referential integrity; the authorization core owns
//! the resolution algorithm. Every required write below is a single atomic
//! operation and uniqueness violations surface as [`StoreError::Conflict`].

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Permission, Role, RoleAssignment, RoleQuery, User, UserQuery};

pub mod memory;

#[cfg(feature = "seaorm")]
pub mod seaorm;

pub use memory::InMemoryRbacStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// Uniqueness constraint violated
    #[error("Constraint violation: {message}")]
    Conflict { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Internal store error: {message}")]
    Internal { message: String },
}

impl StoreError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Persisted users, roles, permissions and their links
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn find_user(&self, user_id: i32) -> StoreResult<Option<User>>;

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Vec<User>>;

    async fn update_user(&self, user: &User) -> StoreResult<User>;

    /// Every assignment row for the user joined with its role, whatever its state
    async fn role_assignments_for_user(
        &self,
        user_id: i32,
    ) -> StoreResult<Vec<(RoleAssignment, Role)>>;

    /// Permissions granted to a role
    async fn role_permissions(&self, role_id: i32) -> StoreResult<Vec<Permission>>;

    async fn find_role(&self, role_id: i32) -> StoreResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn list_roles(&self, query: &RoleQuery) -> StoreResult<Vec<Role>>;

    async fn insert_role(&self, role: Role) -> StoreResult<Role>;

    async fn update_role(&self, role: &Role) -> StoreResult<Role>;

    /// Hard delete, including the role's grants and assignments
    async fn delete_role(&self, role_id: i32) -> StoreResult<bool>;

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;

    async fn insert_permission(&self, permission: Permission) -> StoreResult<Permission>;

    /// Returns false when the grant already existed
    async fn grant_permission(&self, role_id: i32, permission_id: i32) -> StoreResult<bool>;

    async fn revoke_permission(&self, role_id: i32, permission_id: i32) -> StoreResult<bool>;

    async fn find_assignment(
        &self,
        user_id: i32,
        role_id: i32,
    ) -> StoreResult<Option<RoleAssignment>>;

    async fn insert_assignment(&self, assignment: RoleAssignment) -> StoreResult<RoleAssignment>;

    async fn update_assignment(&self, assignment: &RoleAssignment) -> StoreResult<RoleAssignment>;

    /// Deactivate a user and switch off every active assignment
    ///
    /// Returns the updated user and the number of assignments disabled. The
    /// default writes the user row first, so a failure part way leaves the
    /// account unable to sign in; stores with transactions override it.
    async fn deactivate_user(&self, user_id: i32) -> StoreResult<(User, usize)> {
        let mut user = self
            .find_user(user_id)
            .await?
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.is_active = false;
        let user = self.update_user(&user).await?;

        let mut disabled = 0;
        for (mut assignment, _) in self.role_assignments_for_user(user_id).await? {
            if assignment.is_active {
                assignment.is_active = false;
                self.update_assignment(&assignment).await?;
                disabled += 1;
            }
        }
        Ok((user, disabled))
    }
}
