//! SeaORM-backed RBAC store

pub mod entities;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    ModelTrait, NotSet, Order, QueryFilter, QueryOrder, QuerySelect, Schema, Set, SqlErr,
    TransactionTrait,
};
use tracing::error;

use super::{RbacStore, StoreError, StoreResult};
use crate::models::{
    Permission, Role, RoleAssignment, RoleQuery, RoleSortField, SortOrder, User, UserQuery,
    UserSortField,
};
use entities::{
    permissions, role_permissions, roles, user_roles, users, Permissions, RolePermissions, Roles,
    UserRoles, Users,
};

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() {
            return StoreError::Conflict { message };
        }
        match err {
            DbErr::Conn(e) => StoreError::Connection {
                message: e.to_string(),
            },
            DbErr::ConnectionAcquire(e) => StoreError::Connection {
                message: e.to_string(),
            },
            DbErr::RecordNotFound(message) => StoreError::NotFound {
                entity: "record".to_string(),
                id: message,
            },
            other => {
                error!("Database error: {}", other);
                StoreError::Internal {
                    message: other.to_string(),
                }
            }
        }
    }
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            is_active: model.is_active,
            is_verified: model.is_verified,
            is_system_user: model.is_system_user,
            created_at: model.created_at,
        }
    }
}

impl From<roles::Model> for Role {
    fn from(model: roles::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            display_name: model.display_name,
            description: model.description,
            is_system: model.is_system,
            is_active: model.is_active,
            created_at: model.created_at,
        }
    }
}

impl From<permissions::Model> for Permission {
    fn from(model: permissions::Model) -> Self {
        Self {
            id: model.id,
            resource: model.resource,
            action: model.action,
            description: model.description,
        }
    }
}

impl From<user_roles::Model> for RoleAssignment {
    fn from(model: user_roles::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            role_id: model.role_id,
            assigned_at: model.assigned_at,
            assigned_by: model.assigned_by,
            expires_at: model.expires_at,
            is_active: model.is_active,
        }
    }
}

fn order(order: SortOrder) -> Order {
    match order {
        SortOrder::Asc => Order::Asc,
        SortOrder::Desc => Order::Desc,
    }
}

/// Store over any SeaORM connection
#[derive(Clone)]
pub struct SeaOrmRbacStore {
    db: DatabaseConnection,
}

impl SeaOrmRbacStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the RBAC tables and the `(user_id, role_id)` unique index
    pub async fn create_schema(&self) -> StoreResult<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let tables = [
            schema.create_table_from_entity(Users),
            schema.create_table_from_entity(Roles),
            schema.create_table_from_entity(Permissions),
            schema.create_table_from_entity(UserRoles),
            schema.create_table_from_entity(RolePermissions),
        ];
        for mut table in tables {
            let statement = table.if_not_exists().to_owned();
            self.db.execute(backend.build(&statement)).await?;
        }

        let index = Index::create()
            .name("idx_user_roles_user_role")
            .table(UserRoles)
            .col(user_roles::Column::UserId)
            .col(user_roles::Column::RoleId)
            .unique()
            .if_not_exists()
            .to_owned();
        self.db.execute(backend.build(&index)).await?;
        Ok(())
    }

    /// Insert a user row keeping its id; provisioning proper happens elsewhere
    pub async fn add_user(&self, user: &User) -> StoreResult<User> {
        let model = users::ActiveModel {
            id: Set(user.id),
            email: Set(user.email.clone()),
            is_active: Set(user.is_active),
            is_verified: Set(user.is_verified),
            is_system_user: Set(user.is_system_user),
            created_at: Set(user.created_at),
        }
        .insert(&self.db)
        .await?;
        Ok(model.into())
    }
}

#[async_trait]
impl RbacStore for SeaOrmRbacStore {
    async fn find_user(&self, user_id: i32) -> StoreResult<Option<User>> {
        Ok(Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Vec<User>> {
        let mut select = Users::find();
        if let Some(is_active) = query.is_active {
            select = select.filter(users::Column::IsActive.eq(is_active));
        }
        if let Some(is_system_user) = query.is_system_user {
            select = select.filter(users::Column::IsSystemUser.eq(is_system_user));
        }
        if let Some(fragment) = &query.email_contains {
            select = select.filter(users::Column::Email.contains(fragment));
        }

        let column = match query.sort {
            UserSortField::Id => users::Column::Id,
            UserSortField::Email => users::Column::Email,
            UserSortField::CreatedAt => users::Column::CreatedAt,
        };

        Ok(select
            .order_by(column, order(query.order))
            .offset(query.offset)
            .limit(query.limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let existing = Users::find_by_id(user.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("user", user.id))?;

        let mut model: users::ActiveModel = existing.into();
        model.email = Set(user.email.clone());
        model.is_active = Set(user.is_active);
        model.is_verified = Set(user.is_verified);
        model.is_system_user = Set(user.is_system_user);
        Ok(model.update(&self.db).await?.into())
    }

    async fn role_assignments_for_user(
        &self,
        user_id: i32,
    ) -> StoreResult<Vec<(RoleAssignment, Role)>> {
        let rows = UserRoles::find()
            .filter(user_roles::Column::UserId.eq(user_id))
            .find_also_related(Roles)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(assignment, role)| role.map(|role| (assignment.into(), role.into())))
            .collect())
    }

    async fn role_permissions(&self, role_id: i32) -> StoreResult<Vec<Permission>> {
        let rows = RolePermissions::find()
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .find_also_related(Permissions)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(_, permission)| permission.map(Into::into))
            .collect())
    }

    async fn find_role(&self, role_id: i32) -> StoreResult<Option<Role>> {
        Ok(Roles::find_by_id(role_id)
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(Roles::find()
            .filter(roles::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn list_roles(&self, query: &RoleQuery) -> StoreResult<Vec<Role>> {
        let mut select = Roles::find();
        if !query.include_inactive {
            select = select.filter(roles::Column::IsActive.eq(true));
        }

        let column = match query.sort {
            RoleSortField::Id => roles::Column::Id,
            RoleSortField::Name => roles::Column::Name,
            RoleSortField::CreatedAt => roles::Column::CreatedAt,
        };

        Ok(select
            .order_by(column, order(query.order))
            .all(&self.db)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn insert_role(&self, role: Role) -> StoreResult<Role> {
        let model = roles::ActiveModel {
            id: NotSet,
            name: Set(role.name),
            display_name: Set(role.display_name),
            description: Set(role.description),
            is_system: Set(role.is_system),
            is_active: Set(role.is_active),
            created_at: Set(role.created_at),
        }
        .insert(&self.db)
        .await?;
        Ok(model.into())
    }

    async fn update_role(&self, role: &Role) -> StoreResult<Role> {
        let existing = Roles::find_by_id(role.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("role", role.id))?;

        let mut model: roles::ActiveModel = existing.into();
        model.name = Set(role.name.clone());
        model.display_name = Set(role.display_name.clone());
        model.description = Set(role.description.clone());
        model.is_system = Set(role.is_system);
        model.is_active = Set(role.is_active);
        Ok(model.update(&self.db).await?.into())
    }

    async fn delete_role(&self, role_id: i32) -> StoreResult<bool> {
        let txn = self.db.begin().await?;

        let Some(role) = Roles::find_by_id(role_id).one(&txn).await? else {
            return Ok(false);
        };
        RolePermissions::delete_many()
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        UserRoles::delete_many()
            .filter(user_roles::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        role.delete(&txn).await?;

        txn.commit().await?;
        Ok(true)
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        Ok(Permissions::find()
            .filter(permissions::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn insert_permission(&self, permission: Permission) -> StoreResult<Permission> {
        let model = permissions::ActiveModel {
            id: NotSet,
            name: Set(permission.name()),
            resource: Set(permission.resource),
            action: Set(permission.action),
            description: Set(permission.description),
        }
        .insert(&self.db)
        .await?;
        Ok(model.into())
    }

    async fn grant_permission(&self, role_id: i32, permission_id: i32) -> StoreResult<bool> {
        let existing = RolePermissions::find_by_id((role_id, permission_id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let grant = role_permissions::ActiveModel {
            role_id: Set(role_id),
            permission_id: Set(permission_id),
            granted_at: Set(Utc::now()),
        };
        match RolePermissions::insert(grant).exec(&self.db).await {
            Ok(_) => Ok(true),
            Err(e) => match StoreError::from(e) {
                // Lost a race with a concurrent grant
                StoreError::Conflict { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn revoke_permission(&self, role_id: i32, permission_id: i32) -> StoreResult<bool> {
        let result = RolePermissions::delete_by_id((role_id, permission_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find_assignment(
        &self,
        user_id: i32,
        role_id: i32,
    ) -> StoreResult<Option<RoleAssignment>> {
        Ok(UserRoles::find()
            .filter(user_roles::Column::UserId.eq(user_id))
            .filter(user_roles::Column::RoleId.eq(role_id))
            .one(&self.db)
            .await?
            .map(Into::into))
    }

    async fn insert_assignment(&self, assignment: RoleAssignment) -> StoreResult<RoleAssignment> {
        let model = user_roles::ActiveModel {
            id: NotSet,
            user_id: Set(assignment.user_id),
            role_id: Set(assignment.role_id),
            assigned_at: Set(assignment.assigned_at),
            assigned_by: Set(assignment.assigned_by),
            expires_at: Set(assignment.expires_at),
            is_active: Set(assignment.is_active),
        }
        .insert(&self.db)
        .await?;
        Ok(model.into())
    }

    async fn update_assignment(&self, assignment: &RoleAssignment) -> StoreResult<RoleAssignment> {
        let existing = UserRoles::find_by_id(assignment.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found("role assignment", assignment.id))?;

        let mut model: user_roles::ActiveModel = existing.into();
        model.assigned_at = Set(assignment.assigned_at);
        model.assigned_by = Set(assignment.assigned_by);
        model.expires_at = Set(assignment.expires_at);
        model.is_active = Set(assignment.is_active);
        Ok(model.update(&self.db).await?.into())
    }

    async fn deactivate_user(&self, user_id: i32) -> StoreResult<(User, usize)> {
        let txn = self.db.begin().await?;

        let existing = Users::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        let mut model: users::ActiveModel = existing.into();
        model.is_active = Set(false);
        let user = model.update(&txn).await?;

        let disabled = UserRoles::update_many()
            .col_expr(user_roles::Column::IsActive, Expr::value(false))
            .filter(user_roles::Column::UserId.eq(user_id))
            .filter(user_roles::Column::IsActive.eq(true))
            .exec(&txn)
            .await?
            .rows_affected;

        txn.commit().await?;
        Ok((user.into(), disabled as usize))
    }
}
