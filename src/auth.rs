//! Inner auth gate: bearer-token check in front of the mutating worker routes.
//!
//! The worker shares one secret with the calling application. Upload,
//! delete and cleanup must present it as `Authorization: Bearer <token>`;
//! read routes are open.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

/// Environment variable holding the worker secret.
pub const WORKER_TOKEN_ENV: &str = "SITE_STORE_WORKER_TOKEN";

/// The three ways a credential check can fail. They stay distinct because
/// each one is fixed by a different party.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The caller sent nothing.
    #[error("missing {0}")]
    MissingCredential(&'static str),
    /// The caller sent something that does not match.
    #[error("invalid {0}")]
    InvalidCredential(&'static str),
    /// The server has no secret to compare against.
    #[error("server misconfigured: {0} is not set")]
    NotConfigured(&'static str),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential(_) | AuthError::InvalidCredential(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Worker-side auth settings.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub worker_token: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("worker_token", &self.worker_token.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Constant-time comparison of a presented secret against the stored one.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Check an `Authorization` header value against the configured secret.
///
/// Order matters: configuration first, then presence, then value.
pub fn verify_bearer(configured: Option<&str>, header: Option<&str>) -> Result<(), AuthError> {
    let expected = configured
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::NotConfigured(WORKER_TOKEN_ENV))?;

    let header = header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingCredential("Authorization header"))?;

    let presented = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or(AuthError::InvalidCredential("authorization scheme, expected Bearer"))?;

    if tokens_match(presented, expected) {
        Ok(())
    } else {
        Err(AuthError::InvalidCredential("authorization token"))
    }
}

/// Middleware guarding the mutating routes.
pub async fn require_worker_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Err(err) = verify_bearer(state.auth.worker_token.as_deref(), header) {
        warn!(path = %request.uri().path(), "rejected worker request: {}", err);
        return Err(err.into());
    }

    Ok(next.run(request).await)
}
