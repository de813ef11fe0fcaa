//! Authentication middleware and per-route requirements
//!
//! [`authenticate`] resolves the bearer credential once per request and stores
//! the resulting [`AuthContext`] in the request extensions. [`RequireLayer`]
//! then checks a [`Requirement`] against that context synchronously, so a
//! route never touches the store twice.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use civibook_rbac::{AccountGate, AuthContext, Authorizer, GuardPipeline, Requirement};
use futures::future::{ready, Either, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use super::request_id::RequestId;
use crate::errors::WebError;

/// State for [`authenticate`]
#[derive(Clone)]
pub struct Authentication {
    pipeline: Arc<GuardPipeline>,
    gate: AccountGate,
}

impl Authentication {
    pub fn new(pipeline: Arc<GuardPipeline>, gate: AccountGate) -> Self {
        Self { pipeline, gate }
    }
}

/// Token after `Bearer `, if the header carries one
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn authenticate(
    State(auth): State<Authentication>,
    mut request: Request,
    next: Next,
) -> Result<Response, WebError> {
    let correlation_id = request.extensions().get::<RequestId>().cloned();
    let credential = bearer_token(request.headers()).map(str::to_owned);

    let ctx = auth
        .pipeline
        .authenticate(
            credential.as_deref(),
            auth.gate,
            correlation_id.as_ref().map(RequestId::as_str),
        )
        .await?;

    debug!(user_id = ctx.user_id(), roles = ?ctx.roles, "Request authenticated");
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Route layer enforcing a [`Requirement`] on an already authenticated request
#[derive(Clone)]
pub struct RequireLayer {
    authorizer: Authorizer,
    requirement: Arc<Requirement>,
}

impl RequireLayer {
    pub fn new(authorizer: Authorizer, requirement: Requirement) -> Self {
        Self {
            authorizer,
            requirement: Arc::new(requirement),
        }
    }
}

impl<S> Layer<S> for RequireLayer {
    type Service = RequireService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireService {
            inner,
            authorizer: self.authorizer.clone(),
            requirement: self.requirement.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequireService<S> {
    inner: S,
    authorizer: Authorizer,
    requirement: Arc<Requirement>,
}

impl<S> Service<Request> for RequireService<S>
where
    S: Service<Request, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Either<Ready<Result<Response, S::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let decision = match request.extensions().get::<AuthContext>() {
            Some(ctx) => self
                .authorizer
                .authorize(ctx, &self.requirement)
                .map_err(WebError::from),
            None => Err(WebError::unauthenticated("no authenticated caller")),
        };

        match decision {
            Ok(()) => Either::Right(self.inner.call(request)),
            Err(err) => Either::Left(ready(Ok(err.into_response()))),
        }
    }
}

/// The authenticated caller, as stored by [`authenticate`]
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthContext);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| WebError::unauthenticated("no authenticated caller"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use civibook_rbac::{
        AdminHierarchyPolicy, AdminPolicyConfig, AuditTrail, AuthContextBuilder, User,
    };
    use tower::ServiceExt;

    fn authorizer() -> Authorizer {
        Authorizer::new(
            AdminHierarchyPolicy::new(&AdminPolicyConfig::default()),
            AuditTrail::disabled(),
        )
    }

    async fn whoami(CurrentUser(ctx): CurrentUser) -> String {
        ctx.user.email
    }

    fn app(ctx: Option<AuthContext>, requirement: Requirement) -> Router {
        Router::new()
            .route("/", get(whoami))
            .route_layer(RequireLayer::new(authorizer(), requirement))
            .layer(middleware::from_fn(
                move |mut request: Request, next: Next| {
                    let ctx = ctx.clone();
                    async move {
                        if let Some(ctx) = ctx {
                            request.extensions_mut().insert(ctx);
                        }
                        next.run(request).await
                    }
                },
            ))
    }

    fn caller(perms: &[&str]) -> AuthContext {
        perms
            .iter()
            .fold(
                AuthContextBuilder::for_user(User::new(5, "clerk@example.org")),
                |b, p| b.with_permission(*p),
            )
            .build()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_require_layer_grants() {
        let app = app(Some(caller(&["users:*"])), Requirement::permission("users:list"));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"clerk@example.org");
    }

    #[tokio::test]
    async fn test_require_layer_denies() {
        let app = app(Some(caller(&["users:read"])), Requirement::permission("users:delete"));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_require_layer_without_context() {
        let app = app(None, Requirement::permission("users:read"));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
