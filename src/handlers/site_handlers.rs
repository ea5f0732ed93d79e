//! HTTP handlers for the site worker.
//! Mutating handlers take JSON bodies; the serve handler streams object
//! bodies straight from the store. Storage concerns live in `SiteService`.

use crate::{
    errors::{AppError, JsonBody},
    models::deployment::{CleanupRequest, DeleteRequest, UploadRequest},
    services::{mime::resolve_mime_type, object_store::ObjectReader},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;

const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

/// `POST /upload`: store a new deployment.
///
/// 200 when every file was written, 207 when some failed.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<UploadRequest>,
) -> Result<Response, AppError> {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let base_url = state.sites.public_base_url(host);

    let result = state.sites.upload(req, &base_url).await?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(result)).into_response())
}

/// `POST /delete`: remove a whole deployment.
pub async fn delete_deployment(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<DeleteRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.sites.delete_deployment(req).await?))
}

/// `POST /cleanup`: apply the retention policy to a project.
pub async fn cleanup(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CleanupRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.sites.cleanup(req).await?))
}

/// `GET /deployments/{project_id}`: manifests, newest first.
pub async fn list_deployments(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.sites.list_deployments(&project_id).await?))
}

/// `GET /sites/{project_id}/{deployment_id}/{*path}`
pub async fn serve_site_file(
    State(state): State<AppState>,
    Path((project_id, deployment_id, path)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    serve(&state, &project_id, &deployment_id, &path, &headers).await
}

/// `GET /sites/{project_id}/{deployment_id}` and the trailing-slash form.
pub async fn serve_site_root(
    State(state): State<AppState>,
    Path((project_id, deployment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    serve(&state, &project_id, &deployment_id, "", &headers).await
}

/// Anything the router did not dispatch.
///
/// A known path hit with the wrong method is 405 with an `Allow` header.
/// Malformed `/sites/...` paths are a client error; everything else is a
/// plain 404.
pub async fn fallback(method: Method, uri: Uri) -> Response {
    let path = uri.path();
    if let Some(allowed) = allowed_method(path) {
        if method != allowed && !(allowed == Method::GET && method == Method::HEAD) {
            let mut response = AppError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("method {} not allowed on {}, use {}", method, path, allowed),
            )
            .into_response();
            if let Ok(value) = HeaderValue::from_str(allowed.as_str()) {
                response.headers_mut().insert(header::ALLOW, value);
            }
            return response;
        }
    }

    if path == "/sites" || path.starts_with("/sites/") {
        AppError::bad_request(
            "invalid site path: expected /sites/{projectId}/{deploymentId}/{path}",
        )
        .into_response()
    } else {
        AppError::not_found(format!("no route for {}", path)).into_response()
    }
}

/// The one method a routed path answers to, if the path is routed at all.
fn allowed_method(path: &str) -> Option<Method> {
    match path {
        "/upload" | "/delete" | "/cleanup" => return Some(Method::POST),
        "/health" | "/readyz" => return Some(Method::GET),
        _ => {}
    }
    if let Some(project) = path.strip_prefix("/deployments/") {
        return (!project.is_empty() && !project.contains('/')).then_some(Method::GET);
    }
    let mut segments = path.strip_prefix("/sites/")?.split('/');
    match (segments.next(), segments.next()) {
        (Some(project), Some(deployment)) if !project.is_empty() && !deployment.is_empty() => {
            Some(Method::GET)
        }
        _ => None,
    }
}

async fn serve(
    state: &AppState,
    project_id: &str,
    deployment_id: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let started = Instant::now();
    let Some(ObjectReader { meta, body }) =
        state.sites.resolve(project_id, deployment_id, path).await?
    else {
        let shown = if path.is_empty() { "/" } else { path };
        return Ok((
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Not found: {}", shown),
        )
            .into_response());
    };

    let mut response = if etag_matches(headers, &meta.etag) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        response
    } else {
        let content_type = meta
            .content_type
            .clone()
            .unwrap_or_else(|| resolve_mime_type(&meta.key).to_string());
        let mut response = Response::new(Body::from_stream(body));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes));
        response
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!(
        "public, max-age={}, immutable",
        state.sites.config.cache_max_age
    )) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(
        &meta
            .uploaded_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
    ) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!(
        "store;dur={:.1}",
        started.elapsed().as_secs_f64() * 1000.0
    )) {
        headers.insert(SERVER_TIMING, value);
    }

    Ok(response)
}

/// `If-None-Match` check: comma-separated list, quoted or bare tags, weak
/// prefix ignored, `*` matches anything.
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    if_none_match.split(',').map(str::trim).any(|candidate| {
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate == "*" || candidate.trim_matches('"') == etag
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_if_none_match(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn etag_matching() {
        assert!(!etag_matches(&HeaderMap::new(), "abc"));
        assert!(etag_matches(&with_if_none_match("\"abc\""), "abc"));
        assert!(etag_matches(&with_if_none_match("abc"), "abc"));
        assert!(etag_matches(&with_if_none_match("W/\"abc\""), "abc"));
        assert!(etag_matches(&with_if_none_match("\"x\", \"abc\""), "abc"));
        assert!(etag_matches(&with_if_none_match("*"), "abc"));
        assert!(!etag_matches(&with_if_none_match("\"abd\""), "abc"));
    }
}
