use anyhow::{Context, Result};
use axum::Router;
use label_archiver::{
    config::AppConfig,
    db,
    handlers::{AppState, health_handlers::ProbeState},
    messaging::sqlite_broker::SqliteBroker,
    routes,
    services::archive_pipeline::ArchivePipeline,
    stores::{archive_store::DiskArchiveStore, filestore::FilestoreClient},
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting label-archiver with config: {:?}", cfg);

    // --- Ensure archive directory exists ---
    if !Path::new(&cfg.archive_dir).exists() {
        fs::create_dir_all(&cfg.archive_dir)
            .with_context(|| format!("creating archive directory {}", cfg.archive_dir))?;
        tracing::info!("Created archive directory at {}", cfg.archive_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(
        db::connect(&cfg.database_url)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?,
    );
    db::run_migrations(&db)
        .await
        .context("applying database migrations")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize stores and messaging ---
    let source = Arc::new(
        FilestoreClient::new(&cfg.filestore)
            .with_context(|| format!("building filestore client for {}", cfg.filestore))?,
    );
    let archive = Arc::new(DiskArchiveStore::new(db.clone(), cfg.archive_dir.clone()));
    let broker = Arc::new(SqliteBroker::new(db.clone()));
    let pipeline = ArchivePipeline::new(cfg.pipeline_config(), source, archive, broker.clone());

    // --- Shutdown wiring ---
    let cancel = CancellationToken::new();
    let server_stop = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        ctrl_c.cancel();
    });

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState {
        probes: ProbeState {
            shutdown: cancel.clone(),
            pipeline: pipeline.subscribe_state(),
        },
        broker,
    });

    // --- Start probe server ---
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

    tracing::info!("Listening on http://{}", listener.local_addr()?);
    let stop = server_stop.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
    });

    // --- Run pipeline until cancelled or failed ---
    let result = pipeline.run(cancel).await;

    server_stop.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!("Probe server exited with error: {}", err),
        Err(err) => tracing::warn!("Probe server task failed: {}", err),
    }

    let report = result.context("archive pipeline failed")?;
    tracing::info!(
        archived = report.archived,
        received = report.received,
        "Shutdown complete"
    );
    Ok(())
}
