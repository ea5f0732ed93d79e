//! HTTP client for the storage worker.

use crate::{
    errors::{redact, register_secret},
    models::deployment::{
        CleanupRequest, CleanupResult, DeleteRequest, DeleteResult, DeploymentList,
        UploadRequest, UploadResult,
    },
    publish::PublishError,
};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl WorkerClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let token = token.filter(|t| !t.is_empty());
        if let Some(token) = token.as_deref() {
            register_secret(token);
        }
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// `POST /upload`. A 207 partial result is returned as `Ok`; callers
    /// inspect `success`.
    pub async fn upload(&self, request: &UploadRequest) -> Result<UploadResult, PublishError> {
        debug!(files = request.files.len(), "uploading deployment");
        let response = self
            .authorized(self.http.post(self.url("/upload")))
            .json(request)
            .send()
            .await?;
        parse(response).await
    }

    pub async fn delete(
        &self,
        project_id: &str,
        deployment_id: &str,
    ) -> Result<DeleteResult, PublishError> {
        let body = DeleteRequest {
            project_id: Some(project_id.to_string()),
            deployment_id: Some(deployment_id.to_string()),
        };
        let response = self
            .authorized(self.http.post(self.url("/delete")))
            .json(&body)
            .send()
            .await?;
        parse(response).await
    }

    pub async fn cleanup(
        &self,
        project_id: &str,
        retention: Option<usize>,
    ) -> Result<CleanupResult, PublishError> {
        let body = CleanupRequest {
            project_id: Some(project_id.to_string()),
            retention_count: retention.map(serde_json::Value::from),
        };
        let response = self
            .authorized(self.http.post(self.url("/cleanup")))
            .json(&body)
            .send()
            .await?;
        parse(response).await
    }

    pub async fn list_deployments(&self, project_id: &str) -> Result<DeploymentList, PublishError> {
        let response = self
            .http
            .get(self.url(&format!("/deployments/{}", project_id)))
            .send()
            .await?;
        parse(response).await
    }
}

/// Decode a 2xx body, or turn the worker's `{error}` body into `PublishError::Worker`.
async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };
    Err(PublishError::Worker {
        status: status.as_u16(),
        message: redact(&message),
    })
}
