//! Configuration loading: TOML file first, then environment and flag overrides

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tabstream_core::Config;

/// Settings that can come from the environment or the command line.
///
/// Each one overrides the matching config-file value when present.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Bucket holding the datasets
    #[arg(long, env = "DATASET_BUCKET", global = true)]
    pub bucket: Option<String>,

    /// Key prefix of the datasets within the bucket
    #[arg(long, env = "DATASET_PREFIX", global = true)]
    pub prefix: Option<String>,

    /// Storage region
    #[arg(long, env = "AWS_REGION", global = true)]
    pub region: Option<String>,

    /// Custom storage endpoint (falls back to AWS_ENDPOINT_URL)
    #[arg(long, env = "S3_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    #[arg(long, env = "S3_USE_SSL", global = true)]
    pub use_ssl: Option<bool>,

    #[arg(long, env = "S3_PATH_STYLE", global = true)]
    pub path_style: Option<bool>,

    /// Query engine memory ceiling, e.g. 512MB
    #[arg(long, env = "DUCKDB_MEMORY_LIMIT", global = true)]
    pub memory_limit: Option<String>,

    /// Query engine worker threads
    #[arg(long, env = "DUCKDB_THREADS", global = true)]
    pub threads: Option<usize>,

    /// Rows per streamed batch
    #[arg(long, env = "CHUNK_SIZE", global = true)]
    pub chunk_size: Option<usize>,

    /// Serve datasets from this directory instead of object storage
    #[arg(long, env = "LOCAL_DATA_DIR", global = true)]
    pub local_dir: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        let storage = &mut config.storage;
        if let Some(bucket) = self.bucket.filter(|b| !b.trim().is_empty()) {
            storage.bucket = Some(bucket);
        }
        if let Some(prefix) = self.prefix {
            storage.prefix = prefix;
        }
        if let Some(region) = self.region {
            storage.region = region;
        }
        let endpoint = self
            .endpoint
            .or_else(|| std::env::var("AWS_ENDPOINT_URL").ok())
            .filter(|e| !e.is_empty());
        if endpoint.is_some() {
            storage.endpoint = endpoint;
        }
        if let Some(use_ssl) = self.use_ssl {
            storage.use_ssl = use_ssl;
        }
        if let Some(path_style) = self.path_style {
            storage.path_style = path_style;
        }
        if let Some(dir) = self.local_dir {
            storage.local_root = Some(dir);
        }

        let reader = &mut config.reader;
        if let Some(limit) = self.memory_limit {
            reader.memory_limit = Some(limit);
        }
        if let Some(threads) = self.threads {
            reader.threads = Some(threads);
        }
        if let Some(chunk_size) = self.chunk_size {
            reader.chunk_size = chunk_size;
        }
    }
}

/// Load configuration from default locations
///
/// Search order:
/// 1. ./tabstream.toml (current directory)
/// 2. ~/.config/tabstream/config.toml
///
/// If no config file found, returns default config.
pub fn load() -> Result<Config> {
    let local_config = PathBuf::from("tabstream.toml");
    if local_config.exists() {
        return from_file(&local_config);
    }

    if let Some(config_dir) = directories::ProjectDirs::from("", "", "tabstream") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            return from_file(&user_config);
        }
    }

    log::debug!("No config file found, using defaults");
    Ok(Config::default())
}

/// Load configuration from a specific file
pub fn from_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}
