//! The calling-application side of the protocol.
//!
//! `gate` is the outer token check, `client` speaks the worker's HTTP API,
//! and `publisher` ties them together: authorize, upload, then fire a
//! retention cleanup that never affects the publish result.

pub mod client;
pub mod gate;
pub mod publisher;

use crate::auth::AuthError;
use std::{fmt, io, time::Duration};
use thiserror::Error;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0} deployments are not published through the storage worker")]
    UnsupportedTarget(&'static str),
    #[error("worker responded {status}: {message}")]
    Worker { status: u16, message: String },
    #[error("request to worker failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("{0}")]
    InvalidInput(String),
}

/// Client-side settings: where the worker is and which secrets to use.
#[derive(Clone)]
pub struct PublishConfig {
    pub worker_url: String,
    /// Inner token sent to the worker as `Authorization: Bearer`.
    pub worker_token: Option<String>,
    /// Outer token clients must present before anything is sent upstream.
    pub publish_token: Option<String>,
    /// Retention applied after a successful publish; `None` means the
    /// worker's default.
    pub retention: Option<usize>,
    pub timeout: Duration,
}

impl fmt::Debug for PublishConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishConfig")
            .field("worker_url", &self.worker_url)
            .field("worker_token", &self.worker_token.as_ref().map(|_| "<set>"))
            .field("publish_token", &self.publish_token.as_ref().map(|_| "<set>"))
            .field("retention", &self.retention)
            .field("timeout", &self.timeout)
            .finish()
    }
}
