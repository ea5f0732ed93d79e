use crate::{
    auth::{AuthConfig, WORKER_TOKEN_ENV},
    publish::{DEFAULT_REQUEST_TIMEOUT, PublishConfig, gate::PUBLISH_TOKEN_ENV},
    services::site_service::{
        DEFAULT_CACHE_MAX_AGE, DEFAULT_MAX_BODY_BYTES, DEFAULT_RETENTION, SiteConfig,
    },
};
use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Where deployments are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// `objects/` and `meta/` trees under the storage directory.
    Disk,
    /// Process memory; everything is lost on restart.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub public_url: Option<String>,
    pub default_retention: usize,
    pub cache_max_age: u64,
    pub max_body_bytes: usize,
    pub worker_token: Option<String>,
    pub publish_token: Option<String>,
    pub worker_url: String,
    pub timeout: Duration,
}

/// Command-line configuration. Secrets are read from the environment only.
#[derive(Parser, Debug)]
#[command(author, version, about = "Static site deployment store")]
pub struct Args {
    /// Host to bind to (overrides SITE_STORE_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides SITE_STORE_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Storage backend (overrides SITE_STORE_BACKEND)
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Directory for the disk backend (overrides SITE_STORE_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Public origin used in deployment URLs (overrides SITE_STORE_PUBLIC_URL)
    #[arg(long, global = true)]
    pub public_url: Option<String>,

    /// Deployments kept by cleanup (overrides SITE_STORE_DEFAULT_RETENTION)
    #[arg(long, global = true)]
    pub default_retention: Option<usize>,

    /// Cache-Control max-age for served files (overrides SITE_STORE_CACHE_MAX_AGE)
    #[arg(long, global = true)]
    pub cache_max_age: Option<u64>,

    /// Largest accepted request body (overrides SITE_STORE_MAX_BODY_BYTES)
    #[arg(long, global = true)]
    pub max_body_bytes: Option<usize>,

    /// Worker base URL for client commands (overrides SITE_STORE_WORKER_URL)
    #[arg(long, global = true)]
    pub worker_url: Option<String>,

    /// Client request timeout in seconds (overrides SITE_STORE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the storage worker (default)
    Serve,
    /// Upload a directory as a new deployment
    Publish {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        deployment_id: Option<String>,
        /// Publish token presented to the outer gate; defaults to SITE_STORE_PUBLISH_TOKEN
        #[arg(long)]
        token: Option<String>,
        /// Deployments to keep after publishing
        #[arg(long)]
        retention: Option<usize>,
    },
    /// List a project's deployments, newest first
    List {
        #[arg(long)]
        project: String,
    },
    /// Delete one deployment
    Delete {
        #[arg(long)]
        project: String,
        #[arg(long)]
        deployment: String,
    },
    /// Apply the retention policy to a project
    Cleanup {
        #[arg(long)]
        project: String,
        #[arg(long)]
        retention: Option<usize>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        Self::merge(args, |name| env::var(name).ok())
    }

    fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, Command)> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("SITE_STORE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &var, "SITE_STORE_PORT", 3000)?,
            backend: pick(args.backend, &var, "SITE_STORE_BACKEND", Backend::Disk)?,
            storage_dir: args
                .storage_dir
                .or_else(|| var("SITE_STORE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/sites".into()),
            public_url: args
                .public_url
                .or_else(|| var("SITE_STORE_PUBLIC_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            default_retention: pick(
                args.default_retention,
                &var,
                "SITE_STORE_DEFAULT_RETENTION",
                DEFAULT_RETENTION,
            )?,
            cache_max_age: pick(
                args.cache_max_age,
                &var,
                "SITE_STORE_CACHE_MAX_AGE",
                DEFAULT_CACHE_MAX_AGE,
            )?,
            max_body_bytes: pick(
                args.max_body_bytes,
                &var,
                "SITE_STORE_MAX_BODY_BYTES",
                DEFAULT_MAX_BODY_BYTES,
            )?,
            worker_token: var(WORKER_TOKEN_ENV),
            publish_token: var(PUBLISH_TOKEN_ENV),
            worker_url: args
                .worker_url
                .or_else(|| var("SITE_STORE_WORKER_URL"))
                .unwrap_or_else(|| "http://127.0.0.1:3000".into()),
            timeout: Duration::from_secs(pick(
                args.timeout_secs,
                &var,
                "SITE_STORE_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
        };

        if cfg.default_retention == 0 {
            bail!("default retention must be at least 1");
        }
        if cfg.timeout.is_zero() {
            bail!("request timeout must be at least one second");
        }

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn site_config(&self) -> SiteConfig {
        SiteConfig {
            public_url: self.public_url.clone(),
            default_retention: self.default_retention,
            cache_max_age: self.cache_max_age,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            worker_token: self.worker_token.clone(),
        }
    }

    pub fn publish_config(&self, retention: Option<usize>) -> PublishConfig {
        PublishConfig {
            worker_url: self.worker_url.clone(),
            worker_token: self.worker_token.clone(),
            publish_token: self.publish_token.clone(),
            retention,
            timeout: self.timeout,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("storage_dir", &self.storage_dir)
            .field("public_url", &self.public_url)
            .field("default_retention", &self.default_retention)
            .field("cache_max_age", &self.cache_max_age)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("worker_token", &self.worker_token.as_ref().map(|_| "<set>"))
            .field("publish_token", &self.publish_token.as_ref().map(|_| "<set>"))
            .field("worker_url", &self.worker_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// CLI value, else the parsed env var, else `default`.
fn pick<T>(
    cli: Option<T>,
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", name, raw, err)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn merge(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Command)> {
        let args = Args::try_parse_from(std::iter::once("site-store").chain(argv.iter().copied()))?;
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::merge(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_args_or_env() {
        let (cfg, command) = merge(&[], &[]).unwrap();
        assert_eq!(command, Command::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, Backend::Disk);
        assert_eq!(cfg.storage_dir, "./data/sites");
        assert_eq!(cfg.default_retention, DEFAULT_RETENTION);
        assert_eq!(cfg.timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(cfg.worker_token.is_none());
        assert!(cfg.public_url.is_none());
    }

    #[test]
    fn cli_overrides_env() {
        let (cfg, _) = merge(
            &["--port", "8080", "--backend", "memory"],
            &[
                ("SITE_STORE_PORT", "9000"),
                ("SITE_STORE_BACKEND", "disk"),
                ("SITE_STORE_HOST", "127.0.0.1"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn env_values_are_parsed() {
        let (cfg, _) = merge(
            &[],
            &[
                ("SITE_STORE_BACKEND", "Memory"),
                ("SITE_STORE_DEFAULT_RETENTION", "3"),
                ("SITE_STORE_PUBLIC_URL", "https://sites.example.com/"),
                (WORKER_TOKEN_ENV, "inner"),
                (PUBLISH_TOKEN_ENV, ""),
            ],
        )
        .unwrap();
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.site_config().default_retention, 3);
        assert_eq!(
            cfg.site_config().public_url.as_deref(),
            Some("https://sites.example.com")
        );
        assert_eq!(cfg.auth_config().worker_token.as_deref(), Some("inner"));
        assert!(cfg.publish_token.is_none());
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let err = merge(&[], &[("SITE_STORE_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("SITE_STORE_PORT"), "{}", err);
    }

    #[test]
    fn zero_retention_is_rejected() {
        assert!(merge(&["--default-retention", "0"], &[]).is_err());
    }

    #[test]
    fn debug_hides_secrets() {
        let (cfg, _) = merge(
            &[],
            &[(WORKER_TOKEN_ENV, "inner-secret"), (PUBLISH_TOKEN_ENV, "outer-secret")],
        )
        .unwrap();
        let shown = format!("{:?}", cfg);
        assert!(!shown.contains("inner-secret"));
        assert!(!shown.contains("outer-secret"));
        assert!(shown.contains("<set>"));
    }

    #[test]
    fn publish_subcommand() {
        let (cfg, command) = merge(
            &[
                "publish",
                "--dir",
                "dist",
                "--project",
                "docs",
                "--retention",
                "2",
                "--worker-url",
                "http://worker:3000",
            ],
            &[],
        )
        .unwrap();
        assert_eq!(cfg.worker_url, "http://worker:3000");
        assert_eq!(
            command,
            Command::Publish {
                dir: PathBuf::from("dist"),
                project: "docs".into(),
                deployment_id: None,
                token: None,
                retention: Some(2),
            }
        );
    }
}
