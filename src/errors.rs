use crate::{auth::AuthError, services::site_service::SiteError};
use axum::{
    Json,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::{
    cmp::Reverse,
    collections::BTreeSet,
    fmt,
    sync::{LazyLock, RwLock},
};

const REDACTED: &str = "[REDACTED]";
/// Shorter values would redact ordinary words.
const MIN_SECRET_LEN: usize = 4;

/// Configured secrets, scrubbed verbatim from every redacted message.
static CONFIGURED_SECRETS: LazyLock<RwLock<BTreeSet<String>>> =
    LazyLock::new(|| RwLock::new(BTreeSet::new()));

static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+").expect("valid bearer regex")
});
static SECRET_ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(token|secret|password|api[_-]?key)(["']?\s*[:=]\s*["']?)[^\s"',}]+"#)
        .expect("valid secret regex")
});

/// Register a configured secret so `redact` removes it wherever it shows up.
pub fn register_secret(secret: &str) {
    if secret.len() < MIN_SECRET_LEN {
        return;
    }
    CONFIGURED_SECRETS
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(secret.to_string());
}

/// Strip configured secrets and credential-shaped substrings from a message
/// before it is logged or sent to a client.
pub fn redact(message: &str) -> String {
    let mut message = message.to_string();
    {
        let secrets = CONFIGURED_SECRETS
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ordered: Vec<&String> = secrets
            .iter()
            .filter(|secret| message.contains(secret.as_str()))
            .collect();
        // longest first, so a secret containing another is removed whole
        ordered.sort_by_key(|secret| Reverse(secret.len()));
        for secret in ordered {
            message = message.replace(secret.as_str(), REDACTED);
        }
    }

    let message = BEARER_RE.replace_all(&message, format!("Bearer {REDACTED}").as_str());
    SECRET_ASSIGNMENT_RE
        .replace_all(&message, format!("${{1}}${{2}}{REDACTED}").as_str())
        .into_owned()
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    ///
    /// The message is redacted on the way in.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: redact(&msg.into()),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        } else {
            tracing::debug!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<SiteError> for AppError {
    fn from(err: SiteError) -> Self {
        match err {
            SiteError::Validation(msg) => AppError::bad_request(msg),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::new(err.status(), err.to_string())
    }
}

/// `Json` extractor whose rejections use the JSON error shape.
///
/// A body that cannot be parsed is a pipeline failure, reported as 500.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::internal(format!(
                "invalid JSON body: {}",
                rejection.body_text()
            ))),
        }
    }
}
