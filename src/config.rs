use crate::models::{DirectoryPath, Principal};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub root_prefix: DirectoryPath,
    pub public_url: String,
    pub signing_secret: String,
    pub url_ttl_secs: u64,
    pub quota_bytes: Option<u64>,
    pub list_page_size: usize,
    pub principal: Principal,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Folder-style gateway over an object store")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides OBJECT_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Top folder of the browsable tree (overrides OBJECT_GATEWAY_ROOT_PREFIX)
    #[arg(long)]
    pub root_prefix: Option<String>,

    /// Base URL used in presigned links (overrides OBJECT_GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// HMAC secret for presigned links (overrides OBJECT_GATEWAY_SIGNING_SECRET)
    #[arg(long)]
    pub signing_secret: Option<String>,

    /// Default lifetime of download links in seconds (overrides OBJECT_GATEWAY_URL_TTL_SECS)
    #[arg(long)]
    pub url_ttl_secs: Option<u64>,

    /// Total byte quota for stored objects (overrides OBJECT_GATEWAY_QUOTA_BYTES)
    #[arg(long)]
    pub quota_bytes: Option<u64>,

    /// Objects fetched per listing page (overrides OBJECT_GATEWAY_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// Signed-in identity; the session is a guest without one (overrides OBJECT_GATEWAY_IDENTITY)
    #[arg(long)]
    pub identity: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read and parse an optional environment variable.
fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("OBJECT_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed::<u16>("OBJECT_GATEWAY_PORT")?.unwrap_or(3000);
        let env_storage =
            env::var("OBJECT_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("OBJECT_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_gateway.db".into());
        let env_root = env::var("OBJECT_GATEWAY_ROOT_PREFIX").ok();
        let env_public_url = env::var("OBJECT_GATEWAY_PUBLIC_URL").ok();
        let env_secret = env::var("OBJECT_GATEWAY_SIGNING_SECRET").ok();
        let env_ttl = env_parsed::<u64>("OBJECT_GATEWAY_URL_TTL_SECS")?.unwrap_or(900);
        let env_quota = env_parsed::<u64>("OBJECT_GATEWAY_QUOTA_BYTES")?;
        let env_page_size = env_parsed::<usize>("OBJECT_GATEWAY_LIST_PAGE_SIZE")?.unwrap_or(1000);
        let env_identity = env::var("OBJECT_GATEWAY_IDENTITY").ok();

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let root_prefix = match args.root_prefix.or(env_root) {
            Some(raw) => DirectoryPath::from_key_prefix(&raw)
                .with_context(|| format!("invalid root prefix `{}`", raw))?,
            None => DirectoryPath::default_root(),
        };
        let public_url = args
            .public_url
            .or(env_public_url)
            .unwrap_or_else(|| format!("http://{}:{}", host, port));
        let signing_secret = match args.signing_secret.or(env_secret) {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "No signing secret configured; download links will not survive a restart"
                );
                format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
            }
        };
        let principal = match args.identity.or(env_identity) {
            Some(id) if !id.trim().is_empty() => Principal::Identity(id.trim().to_string()),
            _ => Principal::Guest,
        };

        Ok(Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            root_prefix,
            public_url,
            signing_secret,
            url_ttl_secs: args.url_ttl_secs.unwrap_or(env_ttl),
            quota_bytes: args.quota_bytes.or(env_quota),
            list_page_size: args.list_page_size.unwrap_or(env_page_size).clamp(1, 1000),
            principal,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_win_and_derive_defaults() {
        let args = Args::parse_from([
            "object-gateway",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--root-prefix",
            "shared",
            "--identity",
            "alice",
            "--list-page-size",
            "5000",
            "--signing-secret",
            "s3cret",
        ]);
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.root_prefix.as_str(), "shared/");
        assert_eq!(cfg.principal, Principal::Identity("alice".into()));
        assert_eq!(cfg.list_page_size, 1000);
        assert_eq!(cfg.signing_secret, "s3cret");
    }

    #[test]
    fn test_invalid_root_prefix_is_rejected() {
        let args = Args::parse_from(["object-gateway", "--root-prefix", "/abs"]);
        assert!(AppConfig::from_args(args).is_err());
    }
}
