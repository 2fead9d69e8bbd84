use anyhow::{Context, Result};
use axum::Router;
use object_gateway::{
    config::AppConfig,
    db,
    handlers::AppState,
    models::AccessPolicy,
    routes,
    services::{
        browser::BrowserSession,
        gateway::StorageGateway,
        local_backend::{LocalBackend, LocalBackendOptions},
    },
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting object-gateway on {} (root {}, principal {:?}, storage {})",
        cfg.addr(),
        cfg.root_prefix,
        cfg.principal,
        cfg.storage_dir
    );

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let backend = LocalBackend::new(
        db.clone(),
        cfg.storage_dir.clone(),
        LocalBackendOptions {
            public_url: cfg.public_url.clone(),
            signing_secret: cfg.signing_secret.clone(),
            quota_bytes: cfg.quota_bytes,
            page_size: cfg.list_page_size,
            policy: AccessPolicy::default(),
            principal: cfg.principal.clone(),
        },
    );
    let gateway = StorageGateway::new(Arc::new(backend.clone()));
    let session = BrowserSession::new(
        gateway,
        cfg.root_prefix.clone(),
        cfg.url_ttl_secs,
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState { session, backend });

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
    axum::serve(listener, app).await?;

    Ok(())
}
