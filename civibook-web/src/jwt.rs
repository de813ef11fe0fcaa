//! JWT bearer verification
//!
//! [`JwtTokenVerifier`] is the HTTP-side implementation of
//! [`TokenVerifier`]: HS256 signature, issuer, audience and expiry are checked
//! here and the subject is handed to the core untouched.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use civibook_rbac::{TokenError, TokenVerifier, VerifiedToken};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{WebError, WebResult};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issued at
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT secret for signing/verification
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    /// Token lifetime used by [`JwtTokenVerifier::issue_token`]
    pub token_expiry_minutes: i64,
    /// Clock skew tolerated on `exp`
    pub leeway_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            jwt_issuer: "civibook".to_string(),
            jwt_audience: "civibook-clients".to_string(),
            token_expiry_minutes: 60,
            leeway_seconds: 0,
        }
    }
}

impl AuthConfig {
    /// Read `CIVIBOOK_JWT_*` variables over the defaults
    pub fn from_env() -> WebResult<Self> {
        let mut config = Self::default();

        if let Ok(secret) = std::env::var("CIVIBOOK_JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if let Ok(issuer) = std::env::var("CIVIBOOK_JWT_ISSUER") {
            config.jwt_issuer = issuer;
        }
        if let Ok(audience) = std::env::var("CIVIBOOK_JWT_AUDIENCE") {
            config.jwt_audience = audience;
        }
        if let Ok(minutes) = std::env::var("CIVIBOOK_JWT_EXPIRY_MINUTES") {
            config.token_expiry_minutes = minutes.parse().map_err(|_| {
                WebError::internal(format!("Invalid CIVIBOOK_JWT_EXPIRY_MINUTES: {}", minutes))
            })?;
        }
        if let Ok(leeway) = std::env::var("CIVIBOOK_JWT_LEEWAY_SECONDS") {
            config.leeway_seconds = leeway.parse().map_err(|_| {
                WebError::internal(format!("Invalid CIVIBOOK_JWT_LEEWAY_SECONDS: {}", leeway))
            })?;
        }

        if config.jwt_secret.is_empty() {
            return Err(WebError::internal("JWT secret must not be empty"));
        }
        Ok(config)
    }
}

/// HS256 verifier and issuer for bearer tokens
pub struct JwtTokenVerifier {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtTokenVerifier {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Sign a token for `user_id` with the configured lifetime
    pub fn issue_token(&self, user_id: i32) -> WebResult<String> {
        self.issue_token_at(user_id, Utc::now())
    }

    pub fn issue_token_at(&self, user_id: i32, issued_at: DateTime<Utc>) -> WebResult<String> {
        let exp = issued_at + Duration::minutes(self.config.token_expiry_minutes);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| WebError::internal(format!("Failed to generate JWT token: {}", e)))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.jwt_issuer]);
        validation.set_audience(&[&self.config.jwt_audience]);
        validation.leeway = self.config.leeway_seconds;
        validation
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedToken, TokenError> {
        let data = decode::<JwtClaims>(credential, &self.decoding_key, &self.validation()).map_err(
            |e| {
                debug!("JWT verification failed: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                    ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                        TokenError::Rejected(e.to_string())
                    }
                    _ => TokenError::Malformed(e.to_string()),
                }
            },
        )?;

        Ok(VerifiedToken {
            subject: data.claims.sub,
            expires_at: DateTime::<Utc>::from_timestamp(data.claims.exp, 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret-key".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            token_expiry_minutes: 5,
            leeway_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let verifier = JwtTokenVerifier::new(create_test_config());
        let token = verifier.issue_token(42).unwrap();

        let verified = verifier.verify(&token).await.unwrap();
        assert_eq!(verified.subject, "42");
        assert_eq!(verified.user_id(), Some(42));
        assert!(verified.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_expired_token() {
        let verifier = JwtTokenVerifier::new(create_test_config());
        let token = verifier
            .issue_token_at(42, Utc::now() - Duration::hours(2))
            .unwrap();

        assert_eq!(verifier.verify(&token).await.unwrap_err(), TokenError::Expired);
    }

    #[tokio::test]
    async fn test_foreign_signature() {
        let other = JwtTokenVerifier::new(AuthConfig {
            jwt_secret: "another-secret".to_string(),
            ..create_test_config()
        });
        let token = other.issue_token(42).unwrap();

        let verifier = JwtTokenVerifier::new(create_test_config());
        assert_eq!(
            verifier.verify(&token).await.unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[tokio::test]
    async fn test_wrong_audience_and_garbage() {
        let other = JwtTokenVerifier::new(AuthConfig {
            jwt_audience: "someone-else".to_string(),
            ..create_test_config()
        });
        let token = other.issue_token(42).unwrap();

        let verifier = JwtTokenVerifier::new(create_test_config());
        assert!(matches!(
            verifier.verify(&token).await.unwrap_err(),
            TokenError::Rejected(_)
        ));
        assert!(matches!(
            verifier.verify("not-a-jwt").await.unwrap_err(),
            TokenError::Malformed(_)
        ));
    }

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                ("CIVIBOOK_JWT_SECRET", Some("from-env")),
                ("CIVIBOOK_JWT_ISSUER", Some("issuer-env")),
                ("CIVIBOOK_JWT_LEEWAY_SECONDS", Some("30")),
            ],
            || {
                let config = AuthConfig::from_env().unwrap();
                assert_eq!(config.jwt_secret, "from-env");
                assert_eq!(config.jwt_issuer, "issuer-env");
                assert_eq!(config.leeway_seconds, 30);
                assert_eq!(config.jwt_audience, "civibook-clients");
            },
        );

        temp_env::with_var("CIVIBOOK_JWT_LEEWAY_SECONDS", Some("soon"), || {
            assert!(AuthConfig::from_env().is_err());
        });
    }
}
