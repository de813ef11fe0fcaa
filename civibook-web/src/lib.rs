//! # Civibook Web
//!
//! Axum bindings for the authorization core in `civibook-rbac`.
//!
//! - **Authentication**: bearer extraction, HS256 JWT verification and the
//!   [`middleware::authenticate`] layer that stores the caller's
//!   [`civibook_rbac::AuthContext`] in the request
//! - **Requirements**: [`middleware::RequireLayer`] for per-route checks
//! - **Errors**: stable status codes and JSON bodies for every denial kind
//! - **Admin API**: user, role and assignment routes over the core services
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use civibook_rbac::{InMemoryRbacStore, RbacConfig, TracingAuditSink};
//! use civibook_web::{admin_router, AdminState, AuthConfig, JwtTokenVerifier};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let state = AdminState::new(
//!     Arc::new(InMemoryRbacStore::new()),
//!     Arc::new(JwtTokenVerifier::new(AuthConfig::default())),
//!     Arc::new(RbacConfig::with_standard_roles()),
//!     Arc::new(TracingAuditSink),
//! );
//! let app = admin_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, app).await.unwrap();
//! # }
//! ```

pub mod errors;
pub mod jwt;
pub mod logging;
pub mod middleware;
pub mod routes;

pub use errors::{rbac_status, WebError, WebResult};
pub use jwt::{AuthConfig, JwtClaims, JwtTokenVerifier};
pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use middleware::{authenticate, Authentication, CurrentUser, RequestId, RequireLayer};
pub use routes::{admin_router, AdminState};
