//! Process configuration, validated once at startup and injected into components

use std::path::PathBuf;

use serde::Deserialize;

/// Key prefix under which datasets live in the bucket
pub const DEFAULT_PREFIX: &str = "dataset";

/// Region used when neither config nor the AWS environment names one
pub const DEFAULT_REGION: &str = "eu-west-2";

/// Rows per streamed batch
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Column the equality filter applies to
pub const DEFAULT_FILTER_COLUMN: &str = "organisation-entity";

/// Storage file suffix
pub const STORAGE_EXTENSION: &str = "parquet";

/// Zstd level for parquet output
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub reader: ReaderSettings,
    pub encoder: EncoderSettings,
    pub filter_column: FilterColumn,
}

/// Where datasets are read from
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket holding the datasets (required unless `local_root` is set)
    #[serde(deserialize_with = "deserialize_env_var")]
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: String,
    /// Custom endpoint for storage emulators (LocalStack, MinIO)
    #[serde(deserialize_with = "deserialize_env_var")]
    pub endpoint: Option<String>,
    pub use_ssl: bool,
    /// Path-style addressing; implied by a custom endpoint
    pub path_style: bool,
    /// Serve datasets from a local directory instead of object storage
    pub local_root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: DEFAULT_PREFIX.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            use_ssl: true,
            path_style: false,
            local_root: None,
        }
    }
}

impl StorageConfig {
    /// Prefix without leading/trailing slashes
    pub fn normalized_prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }

    /// Endpoint host as the query engine expects it (no scheme)
    pub fn endpoint_host(&self) -> Option<&str> {
        self.endpoint.as_deref().map(|e| {
            e.trim_start_matches("http://")
                .trim_start_matches("https://")
                .trim_end_matches('/')
        })
    }

    /// SSL is forced off for plain-http endpoints
    pub fn effective_use_ssl(&self) -> bool {
        match &self.endpoint {
            Some(e) if e.starts_with("http://") => false,
            _ => self.use_ssl,
        }
    }

    pub fn effective_path_style(&self) -> bool {
        self.path_style || self.endpoint.is_some()
    }
}

/// Query engine settings for one stream.
///
/// Chunk size, thread cap and memory ceiling are one tuning axis: a
/// throughput-oriented deployment raises all three, a constrained function
/// runtime pins threads to 1 and sets a ceiling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// Maximum rows per batch handed to the encoder
    pub chunk_size: usize,
    /// Engine worker threads; `None` keeps the engine default
    pub threads: Option<usize>,
    /// Engine memory ceiling, e.g. "512MB"
    pub memory_limit: Option<String>,
    /// Where the engine installs extensions (must be writable, e.g. /tmp in a function runtime)
    pub extension_directory: Option<PathBuf>,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: if in_function_runtime() { Some(1) } else { None },
            memory_limit: None,
            extension_directory: None,
        }
    }
}

/// Settings for the columnar output encoder
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub zstd_level: i32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// Filter column name with its default
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FilterColumn(pub String);

impl Default for FilterColumn {
    fn default() -> Self {
        Self(DEFAULT_FILTER_COLUMN.to_string())
    }
}

impl FilterColumn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Configuration problem detected at startup
#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Check invariants once; components assume a validated config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bucket_missing = self
            .storage
            .bucket
            .as_deref()
            .map_or(true, |b| b.trim().is_empty());
        if bucket_missing && self.storage.local_root.is_none() {
            return Err(ConfigError(
                "DATASET_BUCKET must be configured".to_string(),
            ));
        }
        if self.reader.chunk_size == 0 {
            return Err(ConfigError("chunk_size must be greater than 0".to_string()));
        }
        if self.reader.threads == Some(0) {
            return Err(ConfigError("threads must be greater than 0".to_string()));
        }
        if self.filter_column.as_str().is_empty() {
            return Err(ConfigError("filter_column cannot be empty".to_string()));
        }
        if !(1..=22).contains(&self.encoder.zstd_level) {
            return Err(ConfigError(format!(
                "zstd_level {} outside 1..=22",
                self.encoder.zstd_level
            )));
        }
        Ok(())
    }
}

/// Running inside a function-as-a-service runtime
pub fn in_function_runtime() -> bool {
    std::env::var_os("AWS_LAMBDA_FUNCTION_NAME").is_some()
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
pub fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}
