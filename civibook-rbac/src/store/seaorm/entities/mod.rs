//! SeaORM entities for the RBAC tables

pub mod permissions;
pub mod role_permissions;
pub mod roles;
pub mod user_roles;
pub mod users;

pub use permissions::Entity as Permissions;
pub use role_permissions::Entity as RolePermissions;
pub use roles::Entity as Roles;
pub use user_roles::Entity as UserRoles;
pub use users::Entity as Users;
