use anyhow::{Context, Result};
use autokyc_core::VerificationService;
use autokyc_store::{FsBlobStore, SqliteDatabase};
use autokycd::config::Config;
use autokycd::{build_router, engine, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "autokycd starting");

    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    let database = Arc::new(
        SqliteDatabase::open(&config.db_path, config.db_pool_size, config.rules())
            .await
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), pool = config.db_pool_size, "database ready");

    tokio::fs::create_dir_all(&config.photo_root)
        .await
        .with_context(|| format!("creating photo root {}", config.photo_root.display()))?;
    let blobs = Arc::new(FsBlobStore::new(config.photo_root.clone()));

    let engine = engine::spawn_engine(
        &config.document_model_path(),
        config.document_classes.clone(),
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.face_match_threshold,
    )
    .context("starting inference engine")?;

    let service = VerificationService::new(
        Arc::new(engine.clone()),
        Arc::new(engine.clone()),
        blobs,
        database.clone(),
        config.service_settings(),
    );
    let app = build_router(
        AppState {
            service,
            database,
            engine: Some(engine),
        },
        config.max_upload_bytes,
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "autokycd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("autokycd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}
