use crate::{
    models::deployment::{FileContent, UploadRequest, UploadResult},
    publish::{
        PublishConfig, PublishError,
        client::WorkerClient,
        gate::{PublishGate, PublishTarget},
    },
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of a publish. `cleanup` is the background retention task, only
/// present when the upload fully succeeded.
#[derive(Debug)]
pub struct Published {
    pub result: UploadResult,
    pub cleanup: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct Publisher {
    gate: PublishGate,
    client: WorkerClient,
    retention: Option<usize>,
}

impl Publisher {
    pub fn new(config: &PublishConfig) -> Result<Self, PublishError> {
        Ok(Self {
            gate: PublishGate::new(config.publish_token.clone()),
            client: WorkerClient::new(
                config.worker_url.clone(),
                config.worker_token.clone(),
                config.timeout,
            )?,
            retention: config.retention,
        })
    }

    pub fn client(&self) -> &WorkerClient {
        &self.client
    }

    /// Authorize, upload, then schedule retention cleanup.
    ///
    /// Nothing reaches the worker unless the outer gate passes. Cleanup
    /// failures are logged and never change the returned result.
    pub async fn publish(
        &self,
        target: PublishTarget,
        client_token: Option<&str>,
        project_id: &str,
        deployment_id: Option<String>,
        files: BTreeMap<String, FileContent>,
    ) -> Result<Published, PublishError> {
        self.gate.authorize(target, client_token)?;
        if target == PublishTarget::Pages {
            return Err(PublishError::UnsupportedTarget("pages"));
        }
        if files.is_empty() {
            return Err(PublishError::InvalidInput("no files to publish".into()));
        }

        let request = UploadRequest {
            files,
            project_id: Some(project_id.to_string()),
            deployment_id,
        };
        let result = self.client.upload(&request).await?;

        let cleanup = if result.success {
            info!(
                project_id = %result.project_id,
                deployment_id = %result.deployment_id,
                files = result.uploaded_files.len(),
                "published deployment"
            );
            Some(self.spawn_cleanup(result.project_id.clone()))
        } else {
            warn!(
                project_id = %result.project_id,
                deployment_id = %result.deployment_id,
                failed = result.errors.len(),
                "partial publish, skipping retention cleanup"
            );
            None
        };

        Ok(Published { result, cleanup })
    }

    fn spawn_cleanup(&self, project_id: String) -> JoinHandle<()> {
        let client = self.client.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            match client.cleanup(&project_id, retention).await {
                Ok(outcome) if outcome.deleted_deployments.is_empty() => {
                    debug!(project_id = %project_id, "nothing to clean up");
                }
                Ok(outcome) => info!(
                    project_id = %project_id,
                    deleted = ?outcome.deleted_deployments,
                    files = outcome.deleted_file_count,
                    "retention cleanup finished"
                ),
                Err(err) => warn!(project_id = %project_id, "retention cleanup failed: {}", err),
            }
        })
    }
}

/// Read every regular file under `dir` into an upload map keyed by its
/// `/`-separated path relative to `dir`.
pub async fn collect_directory(
    dir: impl AsRef<Path>,
) -> Result<BTreeMap<String, FileContent>, PublishError> {
    let root = dir.as_ref();
    let mut files = BTreeMap::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|source| read_error(&current, source))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| read_error(&current, source))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|source| read_error(&path, source))?;

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .map_err(|_| {
                    PublishError::InvalidInput(format!(
                        "{} is outside {}",
                        path.display(),
                        root.display()
                    ))
                })?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| read_error(&path, source))?;
            files.insert(relative, FileContent::from_bytes(bytes));
        }
    }

    if files.is_empty() {
        return Err(PublishError::InvalidInput(format!(
            "no files found in {}",
            root.display()
        )));
    }
    Ok(files)
}

fn read_error(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::Read {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{AuthConfig, AuthError},
        routes::routes::routes,
        services::{
            object_store::MemoryStore,
            site_service::{SiteConfig, SiteService},
        },
        state::AppState,
    };
    use std::{sync::Arc, time::Duration};
    use tokio::net::TcpListener;

    const WORKER_TOKEN: &str = "inner-secret";
    const PUBLISH_TOKEN: &str = "outer-secret";

    async fn spawn_worker() -> String {
        let sites = SiteService::new(Arc::new(MemoryStore::new()), SiteConfig::default());
        let auth = AuthConfig {
            worker_token: Some(WORKER_TOKEN.into()),
        };
        let app = routes(AppState::new(sites, auth));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(worker_url: String, worker_token: &str, retention: Option<usize>) -> PublishConfig {
        PublishConfig {
            worker_url,
            worker_token: Some(worker_token.into()),
            publish_token: Some(PUBLISH_TOKEN.into()),
            retention,
            timeout: Duration::from_secs(5),
        }
    }

    fn site(index: &str) -> BTreeMap<String, FileContent> {
        BTreeMap::from([
            ("index.html".to_string(), FileContent::Text(index.to_string())),
            (
                "img/logo.png".to_string(),
                FileContent::from_bytes(vec![0x89, b'P', b'N', b'G', 0xff, 0x00]),
            ),
        ])
    }

    #[tokio::test]
    async fn publish_uploads_and_serves_over_http() {
        let url = spawn_worker().await;
        let publisher = Publisher::new(&config(url, WORKER_TOKEN, None)).unwrap();

        let published = publisher
            .publish(
                PublishTarget::Storage,
                Some(PUBLISH_TOKEN),
                "docs",
                None,
                site("<h1>hello</h1>"),
            )
            .await
            .unwrap();
        assert!(published.result.success);
        assert_eq!(published.result.uploaded_files.len(), 2);
        published.cleanup.expect("cleanup scheduled").await.unwrap();

        let page = reqwest::get(&published.result.url).await.unwrap();
        assert_eq!(page.status(), 200);
        assert_eq!(page.text().await.unwrap(), "<h1>hello</h1>");

        let site_root = published.result.url.trim_end_matches("index.html");
        let logo = reqwest::get(format!("{}img/logo.png", site_root))
            .await
            .unwrap();
        assert_eq!(logo.headers()["content-type"], "image/png");
        assert_eq!(
            logo.bytes().await.unwrap().as_ref(),
            &[0x89, b'P', b'N', b'G', 0xff, 0x00]
        );
    }

    #[tokio::test]
    async fn cleanup_after_publish_applies_retention() {
        let url = spawn_worker().await;
        let publisher = Publisher::new(&config(url, WORKER_TOKEN, Some(2))).unwrap();

        for n in 1..=3 {
            let published = publisher
                .publish(
                    PublishTarget::Storage,
                    Some(PUBLISH_TOKEN),
                    "docs",
                    Some(format!("deploy-{}-aaa", n)),
                    site(&format!("v{}", n)),
                )
                .await
                .unwrap();
            published.cleanup.unwrap().await.unwrap();
        }

        let listing = publisher.client().list_deployments("docs").await.unwrap();
        let ids: Vec<_> = listing
            .deployments
            .iter()
            .map(|m| m.deployment_id.as_str())
            .collect();
        assert_eq!(ids, vec!["deploy-3-aaa", "deploy-2-aaa"]);
    }

    #[tokio::test]
    async fn gate_rejects_before_anything_is_uploaded() {
        let url = spawn_worker().await;
        let publisher = Publisher::new(&config(url, WORKER_TOKEN, None)).unwrap();

        let err = publisher
            .publish(
                PublishTarget::Storage,
                Some("wrong"),
                "docs",
                None,
                site("x"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Auth(AuthError::InvalidCredential(_))
        ));

        let listing = publisher.client().list_deployments("docs").await.unwrap();
        assert!(listing.deployments.is_empty());
    }

    #[tokio::test]
    async fn pages_target_is_not_sent_to_worker() {
        let publisher = Publisher::new(&config(
            "http://127.0.0.1:9".into(),
            WORKER_TOKEN,
            None,
        ))
        .unwrap();
        let err = publisher
            .publish(PublishTarget::Pages, None, "docs", None, site("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::UnsupportedTarget("pages")));
    }

    #[tokio::test]
    async fn wrong_worker_token_surfaces_worker_error() {
        let url = spawn_worker().await;
        let publisher = Publisher::new(&config(url, "not-the-secret", None)).unwrap();

        let err = publisher
            .publish(
                PublishTarget::Storage,
                Some(PUBLISH_TOKEN),
                "docs",
                None,
                site("x"),
            )
            .await
            .unwrap_err();
        match err {
            PublishError::Worker { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("invalid"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn collect_directory_walks_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("assets/js"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("index.html"), "<p>root</p>")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("assets/js/app.js"), "run()")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("assets/blob.bin"), [0xffu8, 0xfe])
            .await
            .unwrap();

        let files = collect_directory(dir.path()).await.unwrap();
        let keys: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["assets/blob.bin", "assets/js/app.js", "index.html"]);
        assert_eq!(
            files["index.html"],
            FileContent::Text("<p>root</p>".into())
        );
        assert!(matches!(
            files["assets/blob.bin"],
            FileContent::Encoded { .. }
        ));
    }

    #[tokio::test]
    async fn collect_directory_rejects_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_directory(dir.path()).await.unwrap_err();
        assert!(matches!(err, PublishError::InvalidInput(_)));
    }
}
