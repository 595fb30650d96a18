//! Internal management surface: the secret-gated `/api/system` routes.

pub mod auth;
pub(crate) mod handlers;

pub use auth::{validate_gateway_secret, GATEWAY_KEY_HEADER};
