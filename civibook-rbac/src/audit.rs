//! Audit records for authentication, authorization and administration decisions
//!
//! The core only emits structured events; where they end up is the sink's
//! business. Sinks are synchronous and must not block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::error::{DenialKind, RbacError};
use crate::guard::GuardStage;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Authentication,
    Authorization,
    RoleAssigned,
    RoleRevoked,
    RoleChanged,
    UserChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Granted,
    Denied,
}

/// A single decision record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub outcome: AuditOutcome,
    /// Acting user, when known
    pub user_id: Option<i32>,
    /// User the operation targets
    pub target_id: Option<i32>,
    pub correlation_id: Option<String>,
    /// Pipeline stage that produced the decision
    pub stage: Option<GuardStage>,
    /// Display form of the checked requirement
    pub requirement: Option<String>,
    pub denial: Option<DenialKind>,
    pub context: Value,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            outcome,
            user_id: None,
            target_id: None,
            correlation_id: None,
            stage: None,
            requirement: None,
            denial: None,
            context: Value::Object(Map::new()),
        }
    }

    pub fn granted(event_type: AuditEventType) -> Self {
        Self::new(event_type, AuditOutcome::Granted)
    }

    /// Denied event carrying the error's kind and structured context
    pub fn denied(event_type: AuditEventType, err: &RbacError) -> Self {
        let mut event = Self::new(event_type, AuditOutcome::Denied);
        event.denial = Some(err.kind());
        event.context = err.context();
        event
    }

    pub fn with_user(mut self, user_id: i32) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_target(mut self, target_id: i32) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }

    pub fn with_stage(mut self, stage: GuardStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement = Some(requirement.into());
        self
    }

    /// Add a key to the context object
    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(ref mut map) = self.context {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn is_denied(&self) -> bool {
        self.outcome == AuditOutcome::Denied
    }
}

/// Receives decision records
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Writes events as structured `tracing` output under the `audit` target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(target: "audit", "Failed to serialize audit event: {}", e);
                return;
            }
        };

        let denial = event.denial.map(|kind| kind.code());
        match (event.outcome, event.event_type) {
            (AuditOutcome::Denied, _) => warn!(
                target: "audit",
                event_type = ?event.event_type,
                user_id = event.user_id,
                target_id = event.target_id,
                correlation_id = event.correlation_id.as_deref(),
                denial,
                "{}", json
            ),
            (
                AuditOutcome::Granted,
                AuditEventType::Authorization | AuditEventType::Authentication,
            ) => debug!(
                target: "audit",
                event_type = ?event.event_type,
                user_id = event.user_id,
                correlation_id = event.correlation_id.as_deref(),
                "{}", json
            ),
            (AuditOutcome::Granted, _) => info!(
                target: "audit",
                event_type = ?event.event_type,
                user_id = event.user_id,
                target_id = event.target_id,
                correlation_id = event.correlation_id.as_deref(),
                "{}", json
            ),
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn denials(&self) -> Vec<AuditEvent> {
        self.events().into_iter().filter(AuditEvent::is_denied).collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// A sink plus the audit settings that decide what reaches it
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    config: AuditConfig,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>, config: AuditConfig) -> Self {
        Self { sink, config }
    }

    pub fn disabled() -> Self {
        Self::new(
            Arc::new(NoopAuditSink),
            AuditConfig {
                enabled: false,
                log_grants: false,
            },
        )
    }

    /// Forward an event unless auditing is off; granted authorization checks
    /// are only forwarded when `log_grants` is set
    pub fn emit(&self, event: AuditEvent) {
        if !self.config.enabled {
            return;
        }
        if event.outcome == AuditOutcome::Granted
            && event.event_type == AuditEventType::Authorization
            && !self.config.log_grants
        {
            return;
        }
        self.sink.record(&event);
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink), AuditConfig::default())
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_denied_event_carries_error_context() {
        let err = RbacError::InsufficientPermission {
            user_id: 4,
            required: "users:update".to_string(),
            granted: vec!["users:list".to_string()],
        };
        let event = AuditEvent::denied(AuditEventType::Authorization, &err)
            .with_user(4)
            .with_correlation_id(Some("req-1"))
            .with_stage(GuardStage::Denied)
            .with_requirement("permission users:update");

        assert!(event.is_denied());
        assert_eq!(event.denial, Some(DenialKind::InsufficientPermission));
        assert_eq!(event.context["required_permission"], "users:update");
        assert_eq!(event.correlation_id.as_deref(), Some("req-1"));
        assert!(!event.id.is_empty());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["denial"], "INSUFFICIENT_PERMISSION");
        assert_eq!(value["event_type"], "authorization");
        assert_eq!(value["outcome"], "denied");
    }

    #[test]
    fn test_with_context_merges_keys() {
        let event = AuditEvent::granted(AuditEventType::RoleAssigned)
            .with_context("role", json!("staff"))
            .with_context("expires_at", Value::Null);
        assert_eq!(event.context["role"], "staff");
        assert!(event.context.get("expires_at").is_some());
    }

    #[test]
    fn test_trail_filters_grants() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(sink.clone(), AuditConfig::default());

        trail.emit(AuditEvent::granted(AuditEventType::Authorization));
        trail.emit(AuditEvent::granted(AuditEventType::RoleAssigned));
        trail.emit(AuditEvent::denied(
            AuditEventType::Authorization,
            &RbacError::unauthenticated("missing credential"),
        ));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.denials().len(), 1);

        sink.clear();
        let verbose = AuditTrail::new(
            sink.clone(),
            AuditConfig {
                enabled: true,
                log_grants: true,
            },
        );
        verbose.emit(AuditEvent::granted(AuditEventType::Authorization));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_disabled_trail_records_nothing() {
        let sink = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(
            sink.clone(),
            AuditConfig {
                enabled: false,
                log_grants: true,
            },
        );
        trail.emit(AuditEvent::granted(AuditEventType::UserChanged));
        assert!(sink.is_empty());
        AuditTrail::disabled().emit(AuditEvent::granted(AuditEventType::UserChanged));
    }
}
