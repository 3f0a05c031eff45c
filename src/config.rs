use crate::services::ingest::IngestSettings;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store_dir: String,
    pub database_url: String,
    /// Default aggregation threshold for newly created policies, in bytes.
    pub bucket_size_threshold: i64,
    /// Default split window for newly created policies, in bytes.
    pub split_chunk_size: i64,
    /// Uploads larger than this are split instead of aggregated.
    pub split_trigger_size: i64,
    /// Per-key cumulative upload cap in bytes; zero disables it.
    pub capacity_limit_per_key: i64,
    /// Collection used when an upload names none.
    pub default_collection: String,
    /// Key required for administrative bucket endpoints.
    pub admin_api_key: String,
    /// Worker count for job batches spawned off the request path.
    pub job_concurrency: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Edge ingestion node: content-addressed uploads, bucket aggregation, deal-ready archives")]
pub struct Args {
    /// Host to bind to (overrides EDGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides EDGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding the content-addressed block store (overrides EDGE_STORE_DIR)
    #[arg(long)]
    pub store_dir: Option<String>,

    /// Database URL (overrides EDGE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("EDGE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("EDGE_PORT", 1414u16)?;
        let env_store = env::var("EDGE_STORE_DIR").unwrap_or_else(|_| "./data/store".into());
        let env_db = env::var("EDGE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/edge_ingest.db".into());

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            store_dir: args.store_dir.unwrap_or(env_store),
            database_url: args.database_url.unwrap_or(env_db),
            bucket_size_threshold: env_parse("EDGE_BUCKET_AGGREGATE_SIZE", 4_544_576_000i64)?,
            split_chunk_size: env_parse("EDGE_SPLIT_SIZE", 5_048_576_000i64)?,
            split_trigger_size: env_parse("EDGE_MAX_SIZE_TO_SPLIT", 32_000_000_000i64)?,
            capacity_limit_per_key: env_parse("EDGE_CAPACITY_LIMIT_PER_KEY_IN_BYTES", 0i64)?,
            default_collection: env::var("EDGE_DEFAULT_COLLECTION_NAME")
                .unwrap_or_else(|_| "default".into()),
            admin_api_key: env::var("EDGE_ADMIN_API_KEY").unwrap_or_else(|_| "admin".into()),
            job_concurrency: env_parse("EDGE_JOB_CONCURRENCY", 1usize)?,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The subset of configuration the ingest pipeline consumes.
    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            bucket_size_threshold: self.bucket_size_threshold,
            split_chunk_size: self.split_chunk_size,
            split_trigger_size: self.split_trigger_size,
            capacity_limit_per_key: self.capacity_limit_per_key,
            job_concurrency: self.job_concurrency,
        }
    }
}

/// Read an environment variable, falling back to `default` when absent.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
