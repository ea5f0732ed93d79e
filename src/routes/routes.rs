//! Defines the worker's HTTP surface.
//!
//! ## Structure
//! - **Open endpoints**
//!   - `GET  /health`: liveness
//!   - `GET  /readyz`: store round-trip check
//!   - `GET  /sites/{projectId}/{deploymentId}/{*path}`: serve a site file
//!   - `GET  /deployments/{projectId}`: list manifests, newest first
//!
//! - **Bearer-protected endpoints**
//!   - `POST /upload`: store a deployment
//!   - `POST /delete`: remove a deployment
//!   - `POST /cleanup`: apply retention to a project
//!
//! The wildcard `*path` allows nested paths like `assets/js/app.js`.

use crate::{
    auth::require_worker_token,
    handlers::{
        health_handlers::{health, readyz},
        site_handlers::{
            cleanup, delete_deployment, fallback, list_deployments, serve_site_file,
            serve_site_root, upload,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the worker router with its state attached.
///
/// Mutating routes sit behind `require_worker_token`; the rest are open.
pub fn routes(state: AppState) -> Router {
    let body_limit = state.sites.config.max_body_bytes;

    let protected = Router::new()
        .route("/upload", post(upload))
        .route("/delete", post(delete_deployment))
        .route("/cleanup", post(cleanup))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_worker_token,
        ));

    let open = Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/deployments/{project_id}", get(list_deployments))
        .route("/sites/{project_id}/{deployment_id}", get(serve_site_root))
        .route("/sites/{project_id}/{deployment_id}/", get(serve_site_root))
        .route(
            "/sites/{project_id}/{deployment_id}/{*path}",
            get(serve_site_file),
        );

    Router::new()
        .merge(protected)
        .merge(open)
        .fallback(fallback)
        .method_not_allowed_fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
