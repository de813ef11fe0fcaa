//! Identity resolution
//!
//! Turns an opaque bearer credential into a loaded [`User`] and applies the
//! account gates. Token verification is delegated to a [`TokenVerifier`]; the
//! resolver never retries and every failure is terminal for the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditEventType, AuditTrail};
use crate::error::{RbacError, RbacResult};
use crate::guard::{AccountGate, GuardStage};
use crate::models::User;
use crate::store::RbacStore;

/// Claims extracted from a credential that passed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedToken {
    /// Subject id, expected to be a user id
    pub subject: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerifiedToken {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            expires_at: None,
        }
    }

    pub fn user_id(&self) -> Option<i32> {
        self.subject.parse().ok()
    }
}

/// Token verification errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token rejected: {0}")]
    Rejected(String),
}

/// Verifies signature and expiry of a bearer credential
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedToken, TokenError>;
}

struct Rejection {
    reached: GuardStage,
    user_id: Option<i32>,
    error: RbacError,
}

impl Rejection {
    fn at(reached: GuardStage, user_id: Option<i32>, error: RbacError) -> Self {
        Self {
            reached,
            user_id,
            error,
        }
    }
}

/// Loads and gates the caller behind a credential
#[derive(Clone)]
pub struct IdentityResolver {
    verifier: Arc<dyn TokenVerifier>,
    store: Arc<dyn RbacStore>,
    audit: AuditTrail,
}

impl IdentityResolver {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn RbacStore>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            verifier,
            store,
            audit,
        }
    }

    /// Resolve the credential and advance through the account stages up to `gate`
    ///
    /// Emits one authentication audit event, successful or not.
    pub async fn resolve(
        &self,
        credential: Option<&str>,
        gate: AccountGate,
        correlation_id: Option<&str>,
    ) -> RbacResult<User> {
        match self.resolve_gated(credential, gate).await {
            Ok(user) => {
                debug!(
                    user_id = user.id,
                    stage = ?gate.stage(),
                    correlation_id,
                    "Caller authenticated"
                );
                self.audit.emit(
                    AuditEvent::granted(AuditEventType::Authentication)
                        .with_user(user.id)
                        .with_stage(gate.stage())
                        .with_correlation_id(correlation_id),
                );
                Ok(user)
            }
            Err(rejection) => {
                warn!(
                    user_id = rejection.user_id,
                    stage = ?rejection.reached,
                    correlation_id,
                    error = %rejection.error,
                    "Authentication rejected"
                );
                let mut event = AuditEvent::denied(AuditEventType::Authentication, &rejection.error)
                    .with_stage(rejection.reached)
                    .with_correlation_id(correlation_id);
                if let Some(user_id) = rejection.user_id {
                    event = event.with_user(user_id);
                }
                self.audit.emit(event);
                Err(rejection.error)
            }
        }
    }

    async fn resolve_gated(
        &self,
        credential: Option<&str>,
        gate: AccountGate,
    ) -> Result<User, Rejection> {
        let user = self.authenticate(credential).await?;
        let mut stage = GuardStage::Authenticated;

        while stage < gate.stage() {
            match stage {
                GuardStage::Authenticated if !user.is_active => {
                    return Err(Rejection::at(
                        stage,
                        Some(user.id),
                        RbacError::AccountInactive { user_id: user.id },
                    ));
                }
                GuardStage::Active if !user.is_verified => {
                    return Err(Rejection::at(
                        stage,
                        Some(user.id),
                        RbacError::AccountUnverified { user_id: user.id },
                    ));
                }
                _ => {}
            }
            stage = match stage.successor() {
                Some(next) => next,
                None => break,
            };
        }

        Ok(user)
    }

    async fn authenticate(&self, credential: Option<&str>) -> Result<User, Rejection> {
        let unauthenticated = |reason: String| {
            Rejection::at(
                GuardStage::Unauthenticated,
                None,
                RbacError::unauthenticated(reason),
            )
        };

        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| unauthenticated("missing credential".to_string()))?;

        let token = self
            .verifier
            .verify(credential)
            .await
            .map_err(|e| unauthenticated(e.to_string()))?;

        let user_id = token
            .user_id()
            .ok_or_else(|| unauthenticated(format!("malformed subject '{}'", token.subject)))?;

        match self.store.find_user(user_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(unauthenticated(format!("unknown subject {user_id}"))),
            Err(e) => Err(Rejection::at(
                GuardStage::Unauthenticated,
                Some(user_id),
                RbacError::Store(e),
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticTokenVerifier;
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::AuditConfig;
    use crate::error::DenialKind;
    use crate::store::InMemoryRbacStore;

    async fn resolver() -> (IdentityResolver, Arc<MemoryAuditSink>) {
        let store = Arc::new(InMemoryRbacStore::new());
        store.add_user(User::new(1, "ok@example.org")).await;

        let mut inactive = User::new(2, "inactive@example.org");
        inactive.is_active = false;
        store.add_user(inactive).await;

        let mut unverified = User::new(3, "unverified@example.org");
        unverified.is_verified = false;
        store.add_user(unverified).await;

        let sink = Arc::new(MemoryAuditSink::new());
        let audit = AuditTrail::new(sink.clone(), AuditConfig::default());
        (
            IdentityResolver::new(Arc::new(StaticTokenVerifier), store, audit),
            sink,
        )
    }

    #[tokio::test]
    async fn test_resolves_verified_user() {
        let (resolver, sink) = resolver().await;
        let user = resolver
            .resolve(Some("user:1"), AccountGate::Verified, Some("req-9"))
            .await
            .unwrap();
        assert_eq!(user.id, 1);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::Authentication);
        assert_eq!(events[0].correlation_id.as_deref(), Some("req-9"));
        assert!(!events[0].is_denied());
    }

    #[tokio::test]
    async fn test_credential_failures_are_unauthenticated() {
        let (resolver, sink) = resolver().await;
        for credential in [
            None,
            Some(""),
            Some("expired"),
            Some("forged"),
            Some("garbage"),
            Some("user:abc"),
            Some("user:99"),
        ] {
            let err = resolver
                .resolve(credential, AccountGate::Verified, None)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), DenialKind::Unauthenticated, "{credential:?}");
        }
        assert_eq!(sink.denials().len(), 7);
    }

    #[tokio::test]
    async fn test_account_gates() {
        let (resolver, sink) = resolver().await;

        let err = resolver
            .resolve(Some("user:2"), AccountGate::Verified, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::AccountInactive { user_id: 2 }));
        assert_eq!(sink.denials()[0].stage, Some(GuardStage::Authenticated));

        let err = resolver
            .resolve(Some("user:3"), AccountGate::Verified, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::AccountUnverified { user_id: 3 }));

        // Lower gates stop before the failing stage
        assert!(resolver
            .resolve(Some("user:3"), AccountGate::Active, None)
            .await
            .is_ok());
        assert!(resolver
            .resolve(Some("user:2"), AccountGate::Authenticated, None)
            .await
            .is_ok());
    }
}
