//! Capability guard pipeline
//!
//! Every protected operation runs the same linear sequence:
//! `Unauthenticated -> Authenticated -> Active -> Verified -> Authorized | Denied`.
//! The first failing stage ends evaluation with its typed error; later stages
//! never run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregator::PermissionAggregator;
use crate::audit::{AuditEvent, AuditEventType, AuditSink, AuditTrail};
use crate::auth::{AuthContext, AuthContextBuilder};
use crate::config::RbacConfig;
use crate::error::{RbacError, RbacResult};
use crate::hierarchy::{AdminHierarchyPolicy, AdminLevel};
use crate::identity::{IdentityResolver, TokenVerifier};
use crate::models::User;
use crate::store::RbacStore;

/// Pipeline stages, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStage {
    Unauthenticated,
    Authenticated,
    Active,
    Verified,
    Authorized,
    Denied,
}

impl GuardStage {
    /// Next stage on success; terminal stages have none
    pub fn successor(&self) -> Option<GuardStage> {
        match self {
            GuardStage::Unauthenticated => Some(GuardStage::Authenticated),
            GuardStage::Authenticated => Some(GuardStage::Active),
            GuardStage::Active => Some(GuardStage::Verified),
            GuardStage::Verified => Some(GuardStage::Authorized),
            GuardStage::Authorized | GuardStage::Denied => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.successor().is_none()
    }
}

/// How far the account checks must get before authorization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountGate {
    /// Credential valid and user exists
    Authenticated,
    /// Additionally `is_active`
    Active,
    /// Additionally `is_verified`
    #[default]
    Verified,
}

impl AccountGate {
    pub fn stage(&self) -> GuardStage {
        match self {
            AccountGate::Authenticated => GuardStage::Authenticated,
            AccountGate::Active => GuardStage::Active,
            AccountGate::Verified => GuardStage::Verified,
        }
    }
}

/// Declared requirement of a protected operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Requirement {
    /// `resource:action`; sensitive names are upgraded to a hierarchy check
    Permission(String),
    Role(String),
    AnyOfRoles(Vec<String>),
    AdminLevel(AdminLevel),
}

impl Requirement {
    pub fn permission(name: impl Into<String>) -> Self {
        Requirement::Permission(name.into())
    }

    pub fn role(name: impl Into<String>) -> Self {
        Requirement::Role(name.into())
    }

    pub fn any_of_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::AnyOfRoles(roles.into_iter().map(Into::into).collect())
    }

    pub fn admin_level(level: AdminLevel) -> Self {
        Requirement::AdminLevel(level)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Permission(name) => write!(f, "permission {name}"),
            Requirement::Role(name) => write!(f, "role {name}"),
            Requirement::AnyOfRoles(names) => write!(f, "any role of [{}]", names.join(", ")),
            Requirement::AdminLevel(level) => write!(f, "level {level}"),
        }
    }
}

/// Gate plus optional requirement for one protected operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSpec {
    pub gate: AccountGate,
    pub requirement: Option<Requirement>,
}

impl GuardSpec {
    pub fn authenticated() -> Self {
        Self {
            gate: AccountGate::Authenticated,
            requirement: None,
        }
    }

    pub fn active() -> Self {
        Self {
            gate: AccountGate::Active,
            requirement: None,
        }
    }

    pub fn verified() -> Self {
        Self::default()
    }

    pub fn require(requirement: Requirement) -> Self {
        Self {
            gate: AccountGate::Verified,
            requirement: Some(requirement),
        }
    }

    pub fn permission(name: impl Into<String>) -> Self {
        Self::require(Requirement::permission(name))
    }

    pub fn role(name: impl Into<String>) -> Self {
        Self::require(Requirement::role(name))
    }

    pub fn admin_level(level: AdminLevel) -> Self {
        Self::require(Requirement::admin_level(level))
    }

    pub fn with_gate(mut self, gate: AccountGate) -> Self {
        self.gate = gate;
        self
    }
}

/// Decides requirements against an already resolved caller
#[derive(Debug, Clone)]
pub struct Authorizer {
    policy: AdminHierarchyPolicy,
    audit: AuditTrail,
}

impl Authorizer {
    pub fn new(policy: AdminHierarchyPolicy, audit: AuditTrail) -> Self {
        Self { policy, audit }
    }

    pub fn policy(&self) -> &AdminHierarchyPolicy {
        &self.policy
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Pure decision, no audit side effects
    ///
    /// Sensitive permissions go to the hierarchy policy first (system level
    /// before super level). Plain permissions pass outright when the caller
    /// holds an admin wildcard, otherwise through the wildcard matcher.
    pub fn check(&self, ctx: &AuthContext, requirement: &Requirement) -> RbacResult<()> {
        match requirement {
            Requirement::Permission(name) => match self.policy.level_for_permission(name) {
                Some(level) => self
                    .policy
                    .require_level(ctx, level, format!("permission '{name}' is restricted")),
                None if ctx.permissions.has_admin_wildcard() => Ok(()),
                None if ctx.permissions.allows(name) => Ok(()),
                None => Err(RbacError::InsufficientPermission {
                    user_id: ctx.user_id(),
                    required: name.clone(),
                    granted: ctx.permissions.to_vec(),
                }),
            },
            Requirement::Role(role) if ctx.has_role(role) => Ok(()),
            Requirement::Role(role) => Err(RbacError::InsufficientPermission {
                user_id: ctx.user_id(),
                required: format!("role:{role}"),
                granted: ctx.role_names(),
            }),
            Requirement::AnyOfRoles(roles) if ctx.has_any_role(roles.as_slice()) => Ok(()),
            Requirement::AnyOfRoles(roles) => Err(RbacError::InsufficientPermission {
                user_id: ctx.user_id(),
                required: format!("role:{}", roles.join("|")),
                granted: ctx.role_names(),
            }),
            Requirement::AdminLevel(level) => {
                self.policy
                    .require_level(ctx, *level, format!("{level} level required"))
            }
        }
    }

    /// Decide and record
    pub fn authorize(&self, ctx: &AuthContext, requirement: &Requirement) -> RbacResult<()> {
        let decision = self.check(ctx, requirement);
        self.record(ctx, requirement, None, &decision);
        decision
    }

    /// Decide an operation that targets another user
    ///
    /// Self-targeting fails first, whatever the caller's level. Then the
    /// requirement is checked, then whether the caller may touch the target
    /// at all (system users need `system_admin`).
    pub fn authorize_target(
        &self,
        ctx: &AuthContext,
        requirement: &Requirement,
        target: &User,
        operation: &str,
    ) -> RbacResult<()> {
        let decision = self.check_target(ctx, requirement, target, operation);
        self.record(ctx, requirement, Some(target.id), &decision);
        decision
    }

    fn check_target(
        &self,
        ctx: &AuthContext,
        requirement: &Requirement,
        target: &User,
        operation: &str,
    ) -> RbacResult<()> {
        if ctx.user_id() == target.id {
            return Err(RbacError::SelfModification {
                user_id: ctx.user_id(),
                operation: operation.to_string(),
            });
        }
        self.check(ctx, requirement)?;
        self.policy.require_can_modify(ctx, target)
    }

    fn record(
        &self,
        ctx: &AuthContext,
        requirement: &Requirement,
        target_id: Option<i32>,
        decision: &RbacResult<()>,
    ) {
        let mut event = match decision {
            Ok(()) => {
                debug!(
                    user_id = ctx.user_id(),
                    target_id,
                    requirement = %requirement,
                    correlation_id = ctx.correlation_id.as_deref(),
                    "Access granted"
                );
                AuditEvent::granted(AuditEventType::Authorization)
                    .with_stage(GuardStage::Authorized)
            }
            Err(err) => {
                warn!(
                    user_id = ctx.user_id(),
                    target_id,
                    requirement = %requirement,
                    correlation_id = ctx.correlation_id.as_deref(),
                    denial = err.kind().code(),
                    "Access denied"
                );
                AuditEvent::denied(AuditEventType::Authorization, err)
                    .with_stage(GuardStage::Denied)
            }
        };
        event = event
            .with_user(ctx.user_id())
            .with_requirement(requirement.to_string())
            .with_correlation_id(ctx.correlation_id.as_deref());
        if let Some(target_id) = target_id {
            event = event.with_target(target_id);
        }
        self.audit.emit(event);
    }
}

/// Identity resolution, aggregation and authorization wired together
#[derive(Clone)]
pub struct GuardPipeline {
    resolver: IdentityResolver,
    aggregator: PermissionAggregator,
    authorizer: Authorizer,
}

impl GuardPipeline {
    pub fn new(
        store: Arc<dyn RbacStore>,
        verifier: Arc<dyn TokenVerifier>,
        config: &RbacConfig,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let audit = AuditTrail::new(sink, config.audit.clone());
        Self {
            resolver: IdentityResolver::new(verifier, store.clone(), audit.clone()),
            aggregator: PermissionAggregator::new(store),
            authorizer: Authorizer::new(AdminHierarchyPolicy::new(&config.admin), audit),
        }
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn aggregator(&self) -> &PermissionAggregator {
        &self.aggregator
    }

    pub fn policy(&self) -> &AdminHierarchyPolicy {
        self.authorizer.policy()
    }

    /// Resolve the caller up to `gate` and load their effective access once
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        gate: AccountGate,
        correlation_id: Option<&str>,
    ) -> RbacResult<AuthContext> {
        let user = self.resolver.resolve(credential, gate, correlation_id).await?;
        let access = self.aggregator.resolve(user.id).await?;

        let mut builder = access
            .roles
            .into_iter()
            .fold(AuthContextBuilder::for_user(user), |b, role| b.with_role(role))
            .with_permissions(access.permissions);
        if let Some(correlation_id) = correlation_id {
            builder = builder.with_correlation_id(correlation_id);
        }
        Ok(builder.build())
    }

    /// Run every stage of `spec` and return the caller on success
    pub async fn evaluate(
        &self,
        credential: Option<&str>,
        spec: &GuardSpec,
        correlation_id: Option<&str>,
    ) -> RbacResult<AuthContext> {
        let ctx = self.authenticate(credential, spec.gate, correlation_id).await?;
        if let Some(requirement) = &spec.requirement {
            self.authorizer.authorize(&ctx, requirement)?;
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::{AdminPolicyConfig, AuditConfig};
    use crate::error::DenialKind;
    use crate::hierarchy::{ADMIN_ROLE, SUPER_ADMIN_ROLE, SYSTEM_ADMIN_ROLE};
    use crate::identity::testing::StaticTokenVerifier;
    use crate::models::{Permission, Role, RoleAssignment};
    use crate::store::InMemoryRbacStore;

    fn authorizer() -> (Authorizer, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let audit = AuditTrail::new(
            sink.clone(),
            AuditConfig {
                enabled: true,
                log_grants: true,
            },
        );
        (
            Authorizer::new(AdminHierarchyPolicy::new(&AdminPolicyConfig::default()), audit),
            sink,
        )
    }

    fn caller(roles: &[&str], perms: &[&str]) -> AuthContext {
        let builder = roles
            .iter()
            .fold(AuthContextBuilder::for_user(User::new(10, "c@example.org")), |b, r| {
                b.with_role(*r)
            });
        perms
            .iter()
            .fold(builder, |b, p| b.with_permission(*p))
            .build()
    }

    #[test]
    fn test_stage_successors_are_linear() {
        let mut stage = GuardStage::Unauthenticated;
        let mut seen = vec![stage];
        while let Some(next) = stage.successor() {
            assert!(next > stage);
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(stage, GuardStage::Authorized);
        assert!(GuardStage::Denied.is_terminal());
    }

    #[test]
    fn test_plain_permission_with_wildcards() {
        let (auth, _) = authorizer();
        let ctx = caller(&["staff"], &["appointments:*", "offices:read"]);

        assert!(auth.check(&ctx, &Requirement::permission("appointments:cancel")).is_ok());
        assert!(auth.check(&ctx, &Requirement::permission("offices:read")).is_ok());
        let err = auth
            .check(&ctx, &Requirement::permission("offices:update"))
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::InsufficientPermission { ref required, .. } if required == "offices:update"
        ));
    }

    #[test]
    fn test_admin_wildcard_escape_hatch() {
        let (auth, _) = authorizer();
        let ctx = caller(&[], &["roles:*"]);
        // Any plain permission passes, even unrelated resources
        assert!(auth.check(&ctx, &Requirement::permission("appointments:approve")).is_ok());
        assert!(auth.check(&ctx, &Requirement::permission("users:update")).is_ok());
        // Sensitive permissions still need the hierarchy level
        assert!(matches!(
            auth.check(&ctx, &Requirement::permission("roles:create")),
            Err(RbacError::SuperAdminOnly { .. })
        ));
    }

    #[test]
    fn test_sensitive_permissions_use_hierarchy() {
        let (auth, _) = authorizer();
        let sup = caller(&[SUPER_ADMIN_ROLE], &[]);
        assert!(auth.check(&sup, &Requirement::permission("users:delete")).is_ok());
        assert!(matches!(
            auth.check(&sup, &Requirement::permission("system:backup")),
            Err(RbacError::SystemAdminOnly { .. })
        ));

        let global = caller(&[], &["*"]);
        assert!(auth.check(&global, &Requirement::permission("users:list")).is_ok());
        assert!(matches!(
            auth.check(&global, &Requirement::permission("users:delete")),
            Err(RbacError::SuperAdminOnly { .. })
        ));
    }

    #[test]
    fn test_role_requirements() {
        let (auth, _) = authorizer();
        let ctx = caller(&["staff"], &[]);
        assert!(auth.check(&ctx, &Requirement::role("staff")).is_ok());
        assert!(auth.check(&ctx, &Requirement::role("citizen")).is_err());
        assert!(auth
            .check(&ctx, &Requirement::any_of_roles(["citizen", "staff"]))
            .is_ok());
        assert!(auth
            .check(&ctx, &Requirement::any_of_roles(Vec::<String>::new()))
            .is_err());
        assert!(matches!(
            auth.check(&ctx, &Requirement::admin_level(AdminLevel::Admin)),
            Err(RbacError::AdminOnly { .. })
        ));
    }

    #[test]
    fn test_self_modification_blocks_system_admin() {
        let (auth, sink) = authorizer();
        let ctx = caller(&[SYSTEM_ADMIN_ROLE], &["*"]);
        let me = ctx.user.clone();
        let err = auth
            .authorize_target(&ctx, &Requirement::permission("users:update"), &me, "deactivate")
            .unwrap_err();
        assert_eq!(err.kind(), DenialKind::SelfModification);
        assert_eq!(sink.denials()[0].target_id, Some(10));
    }

    #[test]
    fn test_target_system_user_protection() {
        let (auth, _) = authorizer();
        let system = User::system(1, "root@example.org");
        let admin = caller(&[ADMIN_ROLE], &["users:update"]);
        let err = auth
            .authorize_target(&admin, &Requirement::permission("users:update"), &system, "update")
            .unwrap_err();
        assert_eq!(err.kind(), DenialKind::SystemUserProtected);

        let regular = User::new(2, "u@example.org");
        assert!(auth
            .authorize_target(&admin, &Requirement::permission("users:update"), &regular, "update")
            .is_ok());
    }

    #[test]
    fn test_authorize_records_grants_and_denials() {
        let (auth, sink) = authorizer();
        let ctx = caller(&[], &["users:list"]).with_correlation_id("req-7");
        let _ = auth.authorize(&ctx, &Requirement::permission("users:list"));
        let _ = auth.authorize(&ctx, &Requirement::permission("users:update"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, Some(GuardStage::Authorized));
        assert_eq!(events[1].stage, Some(GuardStage::Denied));
        assert_eq!(events[1].requirement.as_deref(), Some("permission users:update"));
        assert_eq!(events[1].correlation_id.as_deref(), Some("req-7"));
    }

    #[tokio::test]
    async fn test_pipeline_fails_fast_and_resolves_once() {
        let store = Arc::new(InMemoryRbacStore::new());
        store.add_user(User::new(1, "clerk@example.org")).await;
        let mut inactive = User::new(2, "gone@example.org");
        inactive.is_active = false;
        store.add_user(inactive).await;

        let role = store.insert_role(Role::new("staff", false)).await.unwrap();
        let perm = store
            .insert_permission(Permission::new("appointments", "read"))
            .await
            .unwrap();
        store.grant_permission(role.id, perm.id).await.unwrap();
        store
            .insert_assignment(RoleAssignment::new(1, role.id, None, None))
            .await
            .unwrap();

        let sink = Arc::new(MemoryAuditSink::new());
        let pipeline = GuardPipeline::new(
            store,
            Arc::new(StaticTokenVerifier),
            &RbacConfig::default(),
            sink.clone(),
        );

        let ctx = pipeline
            .evaluate(Some("user:1"), &GuardSpec::permission("appointments:read"), Some("r1"))
            .await
            .unwrap();
        assert!(ctx.has_role("staff"));
        assert_eq!(ctx.correlation_id.as_deref(), Some("r1"));

        let err = pipeline
            .evaluate(Some("user:2"), &GuardSpec::permission("appointments:read"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DenialKind::AccountInactive);
        // Authorization never ran for the inactive account
        assert!(sink
            .events()
            .iter()
            .all(|e| e.event_type != AuditEventType::Authorization || e.user_id != Some(2)));

        let err = pipeline
            .evaluate(None, &GuardSpec::authenticated(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DenialKind::Unauthenticated);
    }
}
