//! End-to-end admin scenario through the in-memory store
//!
//! An admin holding `{users:list, users:read, users:create, roles:assign}`
//! is checked against plain permissions and then tries to hand out roles,
//! first under the default policy and then with admin-creates-admin enabled.

use anyhow::Result;
use civibook_rbac::{
    AccountGate, AssignOptions, AssignmentOutcome, AuditEventType, ConfigLoader, DenialKind,
    GuardPipeline, GuardSpec, InMemoryRbacStore, MemoryAuditSink, Permission, RbacConfig,
    RbacStore, Role, RoleAssignment, RoleAssignmentService, User,
};
use civibook_web::{AuthConfig, JwtTokenVerifier};
use std::sync::Arc;

const ADMIN_ID: i32 = 1;
const OTHER_ID: i32 = 2;

struct Scenario {
    store: Arc<InMemoryRbacStore>,
    pipeline: GuardPipeline,
    assignments: RoleAssignmentService,
    sink: Arc<MemoryAuditSink>,
    token: String,
}

async fn seed_store() -> Result<Arc<InMemoryRbacStore>> {
    let store = Arc::new(InMemoryRbacStore::new());
    store.add_user(User::new(ADMIN_ID, "admin@example.org")).await;
    store.add_user(User::new(OTHER_ID, "clerk@example.org")).await;

    for name in ["super_admin", "system_admin"] {
        store.insert_role(Role::new(name, true)).await?;
    }
    let admin = store.insert_role(Role::new("admin", true)).await?;

    for name in ["users:list", "users:read", "users:create", "roles:assign"] {
        let key: civibook_rbac::PermissionKey = name.parse()?;
        let permission = store
            .insert_permission(Permission::new(key.resource, key.action))
            .await?;
        store.grant_permission(admin.id, permission.id).await?;
    }

    store
        .insert_assignment(RoleAssignment::new(ADMIN_ID, admin.id, None, None))
        .await?;
    Ok(store)
}

async fn scenario(config: RbacConfig) -> Result<Scenario> {
    let store = seed_store().await?;
    let jwt = JwtTokenVerifier::new(AuthConfig {
        jwt_secret: "scenario-secret".to_string(),
        ..AuthConfig::default()
    });
    let token = jwt.issue_token(ADMIN_ID)?;
    let sink = Arc::new(MemoryAuditSink::new());

    let pipeline = GuardPipeline::new(store.clone(), Arc::new(jwt), &config, sink.clone());
    let assignments = RoleAssignmentService::new(store.clone(), pipeline.authorizer().clone());

    Ok(Scenario {
        store,
        pipeline,
        assignments,
        sink,
        token,
    })
}

fn admin_creates_admins() -> Result<RbacConfig> {
    Ok(ConfigLoader::new().from_yaml_str("admin:\n  allow_admin_to_create_admins: true\n")?)
}

#[tokio::test]
async fn test_permission_checks_for_admin() -> Result<()> {
    let s = scenario(RbacConfig::default()).await?;

    let denied = s
        .pipeline
        .evaluate(Some(&s.token), &GuardSpec::permission("users:update"), None)
        .await
        .unwrap_err();
    assert_eq!(denied.kind(), DenialKind::InsufficientPermission);
    assert_eq!(denied.context()["required_permission"], "users:update");

    let ctx = s
        .pipeline
        .evaluate(Some(&s.token), &GuardSpec::permission("users:list"), None)
        .await?;
    assert_eq!(ctx.user_id(), ADMIN_ID);
    assert!(ctx.has_role("admin"));
    assert_eq!(ctx.permissions.len(), 4);

    Ok(())
}

#[tokio::test]
async fn test_admin_cannot_grant_super_admin() -> Result<()> {
    let s = scenario(RbacConfig::default()).await?;
    let ctx = s
        .pipeline
        .authenticate(Some(&s.token), AccountGate::Verified, Some("req-1"))
        .await?;

    let err = s
        .assignments
        .assign_role(&ctx, OTHER_ID, "super_admin", AssignOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_hierarchy_denial(), "unexpected error: {err}");

    let err = s
        .assignments
        .assign_role(&ctx, OTHER_ID, "admin", AssignOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_hierarchy_denial(), "unexpected error: {err}");

    let super_admin = s.store.find_role_by_name("super_admin").await?.unwrap();
    assert_eq!(s.store.assignment_row_count(OTHER_ID, super_admin.id).await, 0);

    let denial = s
        .sink
        .denials()
        .into_iter()
        .find(|event| event.event_type == AuditEventType::RoleAssigned)
        .unwrap();
    assert_eq!(denial.target_id, Some(OTHER_ID));
    assert_eq!(denial.correlation_id.as_deref(), Some("req-1"));

    Ok(())
}

#[tokio::test]
async fn test_admin_creates_admin_when_enabled() -> Result<()> {
    let config = admin_creates_admins()?;
    assert!(config.admin.allow_admin_to_create_admins);

    let s = scenario(config).await?;
    let ctx = s
        .pipeline
        .authenticate(Some(&s.token), AccountGate::Verified, None)
        .await?;

    let result = s
        .assignments
        .assign_role(&ctx, OTHER_ID, "admin", AssignOptions::default())
        .await?;
    assert_eq!(result.outcome, AssignmentOutcome::Created);
    assert_eq!(result.assignment.assigned_by, Some(ADMIN_ID));

    // super_admin stays out of reach
    let err = s
        .assignments
        .assign_role(&ctx, OTHER_ID, "super_admin", AssignOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_hierarchy_denial());

    let other = s
        .pipeline
        .aggregator()
        .resolve(OTHER_ID)
        .await?;
    assert!(other.roles.contains("admin"));
    assert!(other.permissions.contains("users:list"));

    Ok(())
}

#[tokio::test]
async fn test_admin_cannot_target_self() -> Result<()> {
    let config = admin_creates_admins()?;
    let s = scenario(config).await?;
    let ctx = s
        .pipeline
        .authenticate(Some(&s.token), AccountGate::Verified, None)
        .await?;

    let err = s
        .assignments
        .assign_role(&ctx, ADMIN_ID, "admin", AssignOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DenialKind::SelfModification);
    Ok(())
}
