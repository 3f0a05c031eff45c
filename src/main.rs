use anyhow::Result;
use axum::Router;
use edge_ingest::{
    config::AppConfig,
    routes,
    services::{
        content_store::ContentStore, ingest::IngestService, metadata_store::MetadataStore,
        stats::StatsCache,
    },
    state::{ApiSettings, AppState},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// How long the stats endpoint may serve cached totals.
const STATS_CACHE_TTL: Duration = Duration::from_secs(48 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate_only) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting edge-ingest with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");

    // Create parent directory if needed
    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // Try opening manually before SQLx
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("Database file can be created/opened successfully."),
        Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // Schema statements are idempotent, so the daemon migrates on every
    // start; `--migrate` stops after doing only that.
    let meta = MetadataStore::new(db);
    meta.migrate().await?;
    if migrate_only {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let store = ContentStore::open(&cfg.store_dir).await?;
    tracing::info!("Block store ready at {}", cfg.store_dir);
    let ingest = IngestService::new(meta.clone(), store.clone(), cfg.ingest_settings());
    let state = AppState {
        meta,
        store,
        ingest,
        stats: StatsCache::new(STATS_CACHE_TTL),
        settings: ApiSettings {
            default_collection: cfg.default_collection.clone(),
            admin_api_key: cfg.admin_api_key.clone(),
            bucket_size_threshold: cfg.bucket_size_threshold,
            split_chunk_size: cfg.split_chunk_size,
        },
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

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
