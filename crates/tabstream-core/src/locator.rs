//! Dataset name → storage location, existence checks and engine credentials

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::config::Region;

use crate::config::{StorageConfig, STORAGE_EXTENSION};
use crate::error::DownloadError;
use crate::request::DatasetName;

/// Static credentials handed to the query engine.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for EngineCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// How the engine reaches object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccess {
    pub region: String,
    /// Endpoint host without scheme (emulators only)
    pub endpoint: Option<String>,
    pub use_ssl: bool,
    pub path_style: bool,
    /// `None` lets the engine fall back to its own anonymous access
    pub credentials: Option<EngineCredentials>,
}

/// Maps dataset names onto storage.
#[async_trait]
pub trait Locator: Send + Sync {
    /// URI the engine reads, `s3://{bucket}/{prefix}/{name}.parquet` or a local path.
    fn resolve(&self, dataset: &DatasetName) -> String;

    /// Whether the dataset object exists.
    async fn exists(&self, dataset: &DatasetName) -> Result<bool, DownloadError>;

    /// Remote settings for the engine, resolved per stream so rotated
    /// credentials are picked up. `None` for local storage.
    async fn remote_access(&self) -> Result<Option<RemoteAccess>, DownloadError>;

    /// One-line description for logs
    fn describe(&self) -> String;
}

/// Datasets in an S3-compatible bucket.
pub struct S3Locator {
    client: aws_sdk_s3::Client,
    sdk_config: aws_config::SdkConfig,
    bucket: String,
    prefix: String,
    storage: StorageConfig,
}

impl std::fmt::Debug for S3Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Locator")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Locator {
    /// Build the client from the ambient AWS configuration plus `storage` overrides.
    pub async fn from_config(storage: &StorageConfig) -> Result<Self, DownloadError> {
        let bucket = storage
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| DownloadError::backend("DATASET_BUCKET is not configured"))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()));
        if let Some(endpoint) = &storage.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.effective_path_style())
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            sdk_config,
            bucket,
            prefix: storage.normalized_prefix().to_string(),
            storage: storage.clone(),
        })
    }

    /// Object key for `dataset`
    pub fn key(&self, dataset: &DatasetName) -> String {
        object_key(&self.prefix, dataset)
    }

    async fn credentials(&self) -> Option<EngineCredentials> {
        let Some(provider) = self.sdk_config.credentials_provider() else {
            log::warn!("No AWS credentials provider configured, reading anonymously");
            return None;
        };
        match provider.provide_credentials().await {
            Ok(creds) => Some(EngineCredentials {
                access_key_id: creds.access_key_id().to_string(),
                secret_access_key: creds.secret_access_key().to_string(),
                session_token: creds.session_token().map(str::to_string),
            }),
            Err(e) => {
                log::warn!("No AWS credentials available ({e}), reading anonymously");
                None
            }
        }
    }
}

#[async_trait]
impl Locator for S3Locator {
    fn resolve(&self, dataset: &DatasetName) -> String {
        format!("s3://{}/{}", self.bucket, self.key(dataset))
    }

    async fn exists(&self, dataset: &DatasetName) -> Result<bool, DownloadError> {
        use aws_sdk_s3::error::SdkError;

        let key = self.key(dataset);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let failure = match &e {
                    SdkError::ServiceError(service_err) => {
                        HeadFailure::Status(service_err.raw().status().as_u16())
                    }
                    SdkError::TimeoutError(_) => HeadFailure::Timeout,
                    SdkError::DispatchFailure(_) => HeadFailure::Dispatch,
                    _ => HeadFailure::Other,
                };
                head_failure_outcome(failure, &self.bucket, &key, &format!("{e:?}"))
            }
        }
    }

    async fn remote_access(&self) -> Result<Option<RemoteAccess>, DownloadError> {
        Ok(Some(RemoteAccess {
            region: self.storage.region.clone(),
            endpoint: self.storage.endpoint_host().map(str::to_string),
            use_ssl: self.storage.effective_use_ssl(),
            path_style: self.storage.effective_path_style(),
            credentials: self.credentials().await,
        }))
    }

    fn describe(&self) -> String {
        match &self.storage.endpoint {
            Some(endpoint) => format!("s3://{}/{} via {endpoint}", self.bucket, self.prefix),
            None => format!("s3://{}/{} ({})", self.bucket, self.prefix, self.storage.region),
        }
    }
}

/// Datasets on the local filesystem, laid out as `{root}/{prefix}/{name}.parquet`.
#[derive(Debug, Clone)]
pub struct LocalLocator {
    dir: PathBuf,
}

impl LocalLocator {
    pub fn new(root: &Path, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let dir = if prefix.is_empty() {
            root.to_path_buf()
        } else {
            root.join(prefix)
        };
        Self { dir }
    }

    pub fn path(&self, dataset: &DatasetName) -> PathBuf {
        self.dir
            .join(format!("{}.{STORAGE_EXTENSION}", dataset.as_str()))
    }
}

#[async_trait]
impl Locator for LocalLocator {
    fn resolve(&self, dataset: &DatasetName) -> String {
        self.path(dataset).to_string_lossy().into_owned()
    }

    async fn exists(&self, dataset: &DatasetName) -> Result<bool, DownloadError> {
        match tokio::fs::metadata(self.path(dataset)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(DownloadError::PermissionDenied(e.to_string()))
            }
            Err(e) => Err(DownloadError::backend(e.to_string())),
        }
    }

    async fn remote_access(&self) -> Result<Option<RemoteAccess>, DownloadError> {
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("local {}", self.dir.display())
    }
}

/// Build the locator `storage` asks for.
pub async fn locator_from_config(
    storage: &StorageConfig,
) -> Result<Box<dyn Locator>, DownloadError> {
    match &storage.local_root {
        Some(root) => Ok(Box::new(LocalLocator::new(root, &storage.prefix))),
        None => Ok(Box::new(S3Locator::from_config(storage).await?)),
    }
}

/// How a HeadObject call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadFailure {
    /// The service answered with this HTTP status
    Status(u16),
    Timeout,
    Dispatch,
    Other,
}

/// Absent objects are `Ok(false)`; authorization failures stay distinct from absence.
fn head_failure_outcome(
    failure: HeadFailure,
    bucket: &str,
    key: &str,
    detail: &str,
) -> Result<bool, DownloadError> {
    match failure {
        HeadFailure::Status(404) => Ok(false),
        HeadFailure::Status(403) => {
            log::error!(
                "Access denied for s3://{bucket}/{key}; the service role needs s3:GetObject and s3:ListBucket"
            );
            Err(DownloadError::PermissionDenied(format!(
                "Access denied for s3://{bucket}/{key}"
            )))
        }
        HeadFailure::Status(status) => Err(DownloadError::backend(format!(
            "S3 error for key '{key}' (HTTP {status}): {detail}"
        ))),
        HeadFailure::Timeout => Err(DownloadError::backend(format!(
            "S3 timeout for key '{key}'"
        ))),
        HeadFailure::Dispatch => Err(DownloadError::backend(format!(
            "S3 connection error for key '{key}': {detail}"
        ))),
        HeadFailure::Other => Err(DownloadError::backend(format!(
            "S3 error for key '{key}': {detail}"
        ))),
    }
}

fn object_key(prefix: &str, dataset: &DatasetName) -> String {
    if prefix.is_empty() {
        format!("{}.{STORAGE_EXTENSION}", dataset.as_str())
    } else {
        format!("{prefix}/{}.{STORAGE_EXTENSION}", dataset.as_str())
    }
}
