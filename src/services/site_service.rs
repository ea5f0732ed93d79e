//! SiteService: the deployment pipelines on top of an `ObjectStore`.
//!
//! - Upload: best-effort per file, manifest always written last
//! - Serve: exact key, then `index.html` fallback for directory-like paths
//! - Delete: removes everything under a deployment prefix
//! - Cleanup: keeps the newest N deployments of a project
//!
//! The manifest objects are the only index; listing a project means
//! listing its `_manifest.json` keys and parsing them.

use crate::{
    models::{
        deployment::{
            CleanupRequest, CleanupResult, DeleteRequest, DeleteResult, DeploymentList,
            DeploymentManifest, FileContent, UploadRequest, UploadResult,
        },
        object::{META_DEPLOYMENT_ID, META_PROJECT_ID, META_UPLOADED_AT, PutOptions},
    },
    services::{
        keys::{
            MANIFEST_FILE, build_key, deployment_id_from_manifest_key, deployment_prefix,
            generate_deployment_id, is_valid_deployment_id, is_valid_project_id, manifest_key,
            normalize_path, project_prefix,
        },
        mime::resolve_mime_type,
        object_store::{ObjectReader, ObjectStore, StorageError},
    },
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_RETENTION: usize = 5;
/// One year; deployments never change once written.
pub const DEFAULT_CACHE_MAX_AGE: u64 = 31_536_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to write manifest `{key}`: {source}")]
    ManifestWrite { key: String, source: StorageError },
    #[error("manifest `{key}` is not valid JSON: {source}")]
    CorruptManifest {
        key: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type SiteResult<T> = Result<T, SiteError>;

/// Settings the pipelines need, injected once at startup.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Public origin used to build deployment URLs; falls back to the
    /// request's `Host` header when unset.
    pub public_url: Option<String>,
    pub default_retention: usize,
    pub cache_max_age: u64,
    pub max_body_bytes: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            default_retention: DEFAULT_RETENTION,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct SiteService {
    pub store: Arc<dyn ObjectStore>,
    pub config: Arc<SiteConfig>,
}

impl SiteService {
    pub fn new(store: Arc<dyn ObjectStore>, config: SiteConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Origin that deployment URLs are built from.
    pub fn public_base_url(&self, host: Option<&str>) -> String {
        match (&self.config.public_url, host) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(host)) => format!("http://{}", host),
            (None, None) => String::new(),
        }
    }

    /// Store every file of a new deployment, then its manifest.
    ///
    /// Per-file failures are collected, not fatal. The manifest lists only
    /// the files that were written and is written even when some failed.
    pub async fn upload(&self, req: UploadRequest, base_url: &str) -> SiteResult<UploadResult> {
        let project_id = require_project_id(req.project_id.as_deref())?.to_string();
        if req.files.is_empty() {
            return Err(SiteError::Validation(
                "files must be a non-empty object of path to content".into(),
            ));
        }
        let deployment_id = match req.deployment_id.filter(|id| !id.is_empty()) {
            Some(id) if is_valid_deployment_id(&id) => id,
            Some(_) => return Err(invalid_deployment_id()),
            None => generate_deployment_id(),
        };

        let uploaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut outcomes: Vec<Result<String, String>> = Vec::with_capacity(req.files.len());
        let mut seen = BTreeSet::new();
        for (path, content) in req.files {
            let relative = normalize_path(&path);
            let outcome = if !seen.insert(relative.to_string()) {
                Err(format!("{}: duplicate of {}", path, relative))
            } else {
                self.put_file(&project_id, &deployment_id, &path, content, &uploaded_at)
                    .await
                    .map_err(|msg| format!("{}: {}", path, msg))
            };
            if let Err(err) = &outcome {
                warn!(
                    project_id = %project_id,
                    deployment_id = %deployment_id,
                    "file upload failed: {}",
                    err
                );
            }
            outcomes.push(outcome);
        }

        let (mut uploaded_files, mut errors) = (Vec::new(), Vec::new());
        for outcome in outcomes {
            match outcome {
                Ok(path) => uploaded_files.push(path),
                Err(err) => errors.push(err),
            }
        }

        let manifest = DeploymentManifest::new(
            &project_id,
            &deployment_id,
            uploaded_files.clone(),
            Utc::now(),
        );
        self.write_manifest(&manifest).await?;

        info!(
            project_id = %project_id,
            deployment_id = %deployment_id,
            files = uploaded_files.len(),
            failed = errors.len(),
            "deployment uploaded"
        );

        Ok(UploadResult {
            success: errors.is_empty(),
            url: format!(
                "{}/sites/{}/{}/index.html",
                base_url, project_id, deployment_id
            ),
            project_id,
            deployment_id,
            uploaded_files,
            errors,
        })
    }

    async fn put_file(
        &self,
        project_id: &str,
        deployment_id: &str,
        path: &str,
        content: FileContent,
        uploaded_at: &str,
    ) -> Result<String, String> {
        let relative = normalize_path(path);
        if relative == MANIFEST_FILE {
            return Err(format!("`{}` is reserved", MANIFEST_FILE));
        }
        let body = content.into_bytes()?;
        let opts = PutOptions::with_content_type(resolve_mime_type(relative))
            .meta(META_UPLOADED_AT, uploaded_at)
            .meta(META_PROJECT_ID, project_id)
            .meta(META_DEPLOYMENT_ID, deployment_id);

        self.store
            .put(&build_key(project_id, deployment_id, relative), body, opts)
            .await
            .map_err(|err| err.to_string())?;
        Ok(relative.to_string())
    }

    pub(crate) async fn write_manifest(&self, manifest: &DeploymentManifest) -> SiteResult<()> {
        let key = manifest_key(&manifest.project_id, &manifest.deployment_id);
        let body = serde_json::to_vec(manifest).map_err(|source| SiteError::CorruptManifest {
            key: key.clone(),
            source,
        })?;
        let opts = PutOptions::with_content_type(resolve_mime_type(MANIFEST_FILE))
            .meta(
                META_UPLOADED_AT,
                manifest
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .meta(META_PROJECT_ID, manifest.project_id.as_str())
            .meta(META_DEPLOYMENT_ID, manifest.deployment_id.as_str());

        self.store
            .put(&key, Bytes::from(body), opts)
            .await
            .map_err(|source| SiteError::ManifestWrite { key, source })?;
        Ok(())
    }

    /// Find the object a site request maps to, if any.
    pub async fn resolve(
        &self,
        project_id: &str,
        deployment_id: &str,
        path: &str,
    ) -> SiteResult<Option<ObjectReader>> {
        require_project_id(Some(project_id))?;
        require_deployment_id(Some(deployment_id))?;

        for candidate in candidate_paths(path) {
            let key = build_key(project_id, deployment_id, &candidate);
            match self.store.get(&key).await {
                Ok(Some(object)) => return Ok(Some(object)),
                Ok(None) => {}
                // Nothing can be stored under a key the store rejects.
                Err(StorageError::InvalidObjectKey(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(project_id, deployment_id, path, "no object for site path");
        Ok(None)
    }

    pub async fn delete_deployment(&self, req: DeleteRequest) -> SiteResult<DeleteResult> {
        let project_id = require_project_id(req.project_id.as_deref())?;
        let deployment_id = require_deployment_id(req.deployment_id.as_deref())?;
        self.purge_deployment(project_id, deployment_id).await
    }

    /// Delete every object under the deployment prefix, manifest included.
    async fn purge_deployment(
        &self,
        project_id: &str,
        deployment_id: &str,
    ) -> SiteResult<DeleteResult> {
        let objects = self
            .store
            .list(&deployment_prefix(project_id, deployment_id))
            .await?;

        let mut outcomes: Vec<Result<String, (String, StorageError)>> =
            Vec::with_capacity(objects.len());
        for object in objects {
            let outcome = match self.store.delete(&object.key).await {
                Ok(()) => Ok(object.key),
                Err(err) => Err((object.key, err)),
            };
            outcomes.push(outcome);
        }

        let mut deleted_count = 0;
        let mut failed_count = 0;
        for outcome in &outcomes {
            match outcome {
                Ok(_) => deleted_count += 1,
                Err((key, err)) => {
                    failed_count += 1;
                    warn!(key = %key, "failed to delete object: {}", err);
                }
            }
        }

        info!(
            project_id,
            deployment_id, deleted_count, failed_count, "deployment deleted"
        );

        Ok(DeleteResult {
            success: failed_count == 0,
            deleted_count,
            project_id: project_id.to_string(),
            deployment_id: deployment_id.to_string(),
            failed_count,
        })
    }

    pub async fn list_deployments(&self, project_id: &str) -> SiteResult<DeploymentList> {
        require_project_id(Some(project_id))?;
        Ok(DeploymentList {
            project_id: project_id.to_string(),
            deployments: self.load_manifests(project_id).await?,
        })
    }

    /// Delete all but the newest `retentionCount` deployments of a project.
    pub async fn cleanup(&self, req: CleanupRequest) -> SiteResult<CleanupResult> {
        let project_id = require_project_id(req.project_id.as_deref())?;
        let retention = retention_count(req.retention_count.as_ref(), self.config.default_retention);

        let manifests = self.load_manifests(project_id).await?;
        let mut result = CleanupResult {
            success: true,
            project_id: project_id.to_string(),
            deleted_deployments: Vec::new(),
            deleted_file_count: 0,
        };
        if manifests.len() <= retention {
            debug!(project_id, retention, found = manifests.len(), "nothing to clean up");
            return Ok(result);
        }

        for manifest in manifests.into_iter().skip(retention) {
            let deleted = self
                .purge_deployment(project_id, &manifest.deployment_id)
                .await?;
            result.deleted_file_count += deleted.deleted_count;
            result.success &= deleted.success;
            result.deleted_deployments.push(manifest.deployment_id);
        }

        info!(
            project_id,
            retention,
            deleted = result.deleted_deployments.len(),
            files = result.deleted_file_count,
            "retention cleanup finished"
        );
        Ok(result)
    }

    /// Every readable manifest of a project, newest first.
    ///
    /// Unparsable manifests, and manifests whose ids disagree with their
    /// key, are skipped with a warning.
    async fn load_manifests(&self, project_id: &str) -> SiteResult<Vec<DeploymentManifest>> {
        let objects = self.store.list(&project_prefix(project_id)).await?;

        let mut manifests = Vec::new();
        for object in objects {
            let Some(expected_id) = deployment_id_from_manifest_key(project_id, &object.key)
            else {
                continue;
            };
            match self.read_manifest(&object.key).await {
                Ok(Some(manifest))
                    if manifest.project_id == project_id
                        && manifest.deployment_id == expected_id =>
                {
                    manifests.push(manifest)
                }
                Ok(Some(_)) => warn!(key = %object.key, "manifest does not match its key, skipping"),
                Ok(None) => debug!(key = %object.key, "manifest vanished during listing"),
                Err(err) => warn!(key = %object.key, "skipping unreadable manifest: {}", err),
            }
        }

        sort_newest_first(&mut manifests);
        Ok(manifests)
    }

    async fn read_manifest(&self, key: &str) -> SiteResult<Option<DeploymentManifest>> {
        let Some(object) = self.store.get(key).await? else {
            return Ok(None);
        };
        let raw = object.bytes().await.map_err(StorageError::Io)?;
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| SiteError::CorruptManifest {
                key: key.to_string(),
                source,
            })
    }
}

/// Keys to try, in order, for a requested site path.
///
/// Paths without a `.` look like directories and also try `index.html`
/// beneath them; the deployment root maps straight to `index.html`.
pub fn candidate_paths(path: &str) -> Vec<String> {
    let path = normalize_path(path);
    if path.is_empty() {
        return vec!["index.html".to_string()];
    }
    if path.contains('.') {
        return vec![path.to_string()];
    }
    if path.ends_with('/') {
        vec![path.to_string(), format!("{}index.html", path)]
    } else {
        vec![path.to_string(), format!("{}/index.html", path)]
    }
}

/// Positive numbers (or numeric strings) are used as-is, rounded down;
/// anything else means the configured default.
pub fn retention_count(value: Option<&Value>, default: usize) -> usize {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() && n >= 1.0 => n.floor() as usize,
        _ => default,
    }
}

fn sort_newest_first(manifests: &mut [DeploymentManifest]) {
    manifests.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.deployment_id.cmp(&a.deployment_id))
    });
}

fn require_project_id(id: Option<&str>) -> SiteResult<&str> {
    match id {
        None | Some("") => Err(SiteError::Validation("projectId is required".into())),
        Some(id) if is_valid_project_id(id) => Ok(id),
        Some(_) => Err(SiteError::Validation(
            "invalid projectId: expected letters, digits, `_` or `-`".into(),
        )),
    }
}

fn require_deployment_id(id: Option<&str>) -> SiteResult<&str> {
    match id {
        None | Some("") => Err(SiteError::Validation("deploymentId is required".into())),
        Some(id) if is_valid_deployment_id(id) => Ok(id),
        Some(_) => Err(invalid_deployment_id()),
    }
}

fn invalid_deployment_id() -> SiteError {
    SiteError::Validation("invalid deploymentId: expected deploy-{timestamp}-{suffix}".into())
}
