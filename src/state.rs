//! Shared state handed to every handler.

use crate::{auth::AuthConfig, errors::register_secret, services::site_service::SiteService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub sites: SiteService,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    /// Also registers the worker secret for redaction.
    pub fn new(sites: SiteService, auth: AuthConfig) -> Self {
        if let Some(token) = auth.worker_token.as_deref() {
            register_secret(token);
        }
        Self {
            sites,
            auth: Arc::new(auth),
        }
    }
}
