//! Middleware for the Civibook HTTP layer

pub mod auth;
pub mod request_id;

pub use auth::{
    authenticate, bearer_token, Authentication, CurrentUser, RequireLayer, RequireService,
};
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
