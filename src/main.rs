use anyhow::{Result, bail};
use serde::Serialize;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod publish;
mod routes;
mod services;
mod state;

use config::{AppConfig, Backend, Command};
use publish::{
    client::WorkerClient,
    gate::PublishTarget,
    publisher::{Publisher, collect_directory},
};
use services::{
    disk_store::DiskStore,
    object_store::{MemoryStore, ObjectStore},
    site_service::SiteService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Loaded config: {:?}", cfg);

    match command {
        Command::Serve => serve(cfg).await,
        Command::Publish {
            dir,
            project,
            deployment_id,
            token,
            retention,
        } => {
            let files = collect_directory(&dir).await?;
            tracing::info!("Publishing {} files from {}", files.len(), dir.display());

            let publisher = Publisher::new(&cfg.publish_config(retention))?;
            let token = token.or_else(|| cfg.publish_token.clone());
            let published = publisher
                .publish(
                    PublishTarget::Storage,
                    token.as_deref(),
                    &project,
                    deployment_id,
                    files,
                )
                .await?;
            if let Some(cleanup) = published.cleanup {
                cleanup.await?;
            }

            print_json(&published.result)?;
            if !published.result.success {
                bail!(
                    "{} file(s) failed to upload",
                    published.result.errors.len()
                );
            }
            Ok(())
        }
        Command::List { project } => print_json(&client(&cfg)?.list_deployments(&project).await?),
        Command::Delete {
            project,
            deployment,
        } => {
            let result = client(&cfg)?.delete(&project, &deployment).await?;
            print_json(&result)?;
            if !result.success {
                bail!("{} object(s) could not be deleted", result.failed_count);
            }
            Ok(())
        }
        Command::Cleanup { project, retention } => {
            print_json(&client(&cfg)?.cleanup(&project, retention).await?)
        }
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    tracing::info!("Starting site-store with config: {:?}", cfg);

    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Disk => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            Arc::new(DiskStore::new(cfg.storage_dir.clone()))
        }
        Backend::Memory => {
            tracing::warn!("Using the memory backend; deployments are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    if cfg.worker_token.is_none() {
        tracing::warn!(
            "{} is not set; upload, delete and cleanup will answer 500",
            auth::WORKER_TOKEN_ENV
        );
    }

    let sites = SiteService::new(store, cfg.site_config());
    let app = routes::routes::routes(state::AppState::new(sites, cfg.auth_config()));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn client(cfg: &AppConfig) -> Result<WorkerClient> {
    Ok(WorkerClient::new(
        cfg.worker_url.clone(),
        cfg.worker_token.clone(),
        cfg.timeout,
    )?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
}
