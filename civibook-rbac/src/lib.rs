//! RBAC (Role-Based Access Control) core for Civibook
//!
//! This crate decides who may do what, independent of any web framework:
//! - Users, roles, permissions and time-limited role assignments
//! - Permission aggregation with `resource:*` and `*` wildcards
//! - The admin hierarchy (`admin < super_admin < system_admin`)
//! - An ordered guard pipeline returning typed denials
//! - Structured audit records for every decision
//!
//! Storage sits behind [`store::RbacStore`]; an in-memory store is always
//! available and a SeaORM store is behind the `seaorm` feature.

pub mod aggregator;
pub mod assignment;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod hierarchy;
pub mod identity;
pub mod models;
pub mod permissions;
pub mod roles;
pub mod store;
pub mod users;

pub use aggregator::{PermissionAggregator, ResolvedAccess};
pub use assignment::{
    AssignMode, AssignOptions, AssignmentOutcome, AssignmentResult, RoleAssignmentService,
    ASSIGN_PERMISSION,
};
pub use audit::{
    AuditEvent, AuditEventType, AuditOutcome, AuditSink, AuditTrail, MemoryAuditSink, NoopAuditSink,
    TracingAuditSink,
};
pub use auth::{AuthContext, AuthContextBuilder};
pub use config::{AdminPolicyConfig, AuditConfig, ConfigLoader, RbacConfig, RoleDefinition};
pub use error::{DenialKind, RbacError, RbacResult};
pub use guard::{AccountGate, Authorizer, GuardPipeline, GuardSpec, GuardStage, Requirement};
pub use hierarchy::{AdminHierarchyPolicy, AdminLevel};
pub use identity::{IdentityResolver, TokenError, TokenVerifier, VerifiedToken};
pub use models::{
    Permission, PermissionKey, Role, RoleAssignment, RoleQuery, RoleSortField, SortOrder, User,
    UserQuery, UserSortField,
};
pub use permissions::{permission_matches, EffectivePermissions};
pub use roles::{NewRole, RoleDeletion, RoleManager, RoleUpdate};
pub use store::{InMemoryRbacStore, RbacStore, StoreError, StoreResult};
pub use users::UserAdministration;

#[cfg(feature = "seaorm")]
pub use store::seaorm::SeaOrmRbacStore;
