//! Health & readiness handlers.
//!
//! - GET /health -> liveness (`{status, timestamp}`)
//! - GET /readyz -> readiness that round-trips a sentinel object through the store

use crate::{models::object::PutOptions, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const SENTINEL_BODY: &[u8] = b"readyz";

/// `GET /health`
///
/// Liveness only. Always 200, never touches the store.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
    )
}

/// `GET /readyz`
///
/// Writes, reads back and deletes a sentinel object under `.readyz/`, a prefix
/// no project id can collide with. HTTP 200 when the round trip works,
/// HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store = &state.sites.store;
    let key = format!(".readyz/{}", Uuid::new_v4());

    let store_check = match store
        .put(&key, Bytes::from_static(SENTINEL_BODY), PutOptions::default())
        .await
    {
        Ok(_) => {
            let read_back = match store.get(&key).await {
                Ok(Some(object)) => match object.bytes().await {
                    Ok(bytes) if bytes.as_ref() == SENTINEL_BODY => (true, None::<String>),
                    Ok(_) => (false, Some("sentinel content mismatch".to_string())),
                    Err(e) => (false, Some(format!("could not read sentinel: {}", e))),
                },
                Ok(None) => (false, Some("sentinel missing after write".to_string())),
                Err(e) => (false, Some(format!("could not read sentinel: {}", e))),
            };
            // a leftover sentinel is reported, the round trip still counts
            match store.delete(&key).await {
                Ok(_) => read_back,
                Err(e) => (
                    read_back.0,
                    Some(format!("could not remove sentinel: {}", e)),
                ),
            }
        }
        Err(e) => (false, Some(format!("could not write sentinel: {}", e))),
    };

    let overall_ok = store_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "store",
        CheckStatus {
            ok: store_check.0,
            backend: store.backend(),
            error: store_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    backend: &'static str,
    error: Option<String>,
}
