//! Closed error taxonomy for dataset downloads

/// Discriminant of a [`DownloadError`], for callers that only need the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    PermissionDenied,
    ResourceExhausted,
    Backend,
    StreamTruncated,
}

impl ErrorKind {
    /// Short machine-readable label, used in logs and error envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Backend => "backend_error",
            Self::StreamTruncated => "stream_truncated",
        }
    }
}

/// Error from any stage of a download, before or during streaming.
///
/// Everything except [`DownloadError::StreamTruncated`] can still be turned into
/// a structured response, because it happens before the first chunk is sent.
#[derive(Debug)]
pub enum DownloadError {
    /// Bad dataset name, unsupported extension, malformed path or traversal attempt
    InvalidRequest(String),
    /// Dataset object absent in storage
    NotFound(String),
    /// Storage backend rejected our credentials (deployment misconfiguration)
    PermissionDenied(String),
    /// Query engine hit its memory ceiling
    ResourceExhausted(String),
    /// Any other storage or engine failure
    Backend(String),
    /// Failure after the response started; only the connection can be cut
    StreamTruncated(String),
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(m) => write!(f, "invalid request: {m}"),
            Self::NotFound(m) => write!(f, "{m}"),
            Self::PermissionDenied(m) => write!(f, "permission denied: {m}"),
            Self::ResourceExhausted(m) => write!(
                f,
                "query engine out of memory: {m} (raise the memory limit)"
            ),
            Self::Backend(m) => write!(f, "backend error: {m}"),
            Self::StreamTruncated(m) => write!(f, "stream truncated: {m}"),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Backend(_) => ErrorKind::Backend,
            Self::StreamTruncated(_) => ErrorKind::StreamTruncated,
        }
    }

    /// HTTP status shared by both deployment adapters.
    ///
    /// `StreamTruncated` never reaches a status line; 500 is returned only so the
    /// mapping is total.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::ResourceExhausted(_) => 503,
            Self::PermissionDenied(_) | Self::Backend(_) | Self::StreamTruncated(_) => 500,
        }
    }

    /// Whether the same request may succeed if the caller tries again.
    ///
    /// Out-of-memory is retryable once the operator raises the ceiling;
    /// client errors and permission problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted(_) | Self::Backend(_) | Self::StreamTruncated(_)
        )
    }

    /// Re-tag a failure that happened after the first chunk was sent.
    pub fn into_truncated(self) -> Self {
        match self {
            Self::StreamTruncated(_) => self,
            other => Self::StreamTruncated(other.to_string()),
        }
    }

    /// Message safe to show to a client.
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidRequest(m) | Self::NotFound(m) => m.clone(),
            Self::PermissionDenied(_) => {
                "Server configuration error: storage access denied".to_string()
            }
            Self::ResourceExhausted(_) => {
                "Dataset too large for the configured memory limit; ask the operator to raise it"
                    .to_string()
            }
            Self::Backend(_) | Self::StreamTruncated(_) => {
                "Internal server error while processing dataset".to_string()
            }
        }
    }
}

impl From<arrow::error::ArrowError> for DownloadError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Backend(format!("arrow: {e}"))
    }
}

impl From<parquet::errors::ParquetError> for DownloadError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Backend(format!("parquet: {e}"))
    }
}

/// Map a query engine failure onto the taxonomy.
///
/// The structured engine code is consulted first. DuckDB reports most remote
/// failures with a generic code, so the message text is the fallback:
/// `Out of Memory`, `HTTP 403`/`AccessDenied`, and the several spellings
/// httpfs uses for a missing object.
pub fn classify_engine_error(err: &duckdb::Error) -> DownloadError {
    use duckdb::ffi::ErrorCode;

    if let duckdb::Error::DuckDBFailure(code, _) = err {
        match code.code {
            ErrorCode::OutOfMemory => return DownloadError::ResourceExhausted(err.to_string()),
            ErrorCode::PermissionDenied => return DownloadError::PermissionDenied(err.to_string()),
            ErrorCode::NotFound => return DownloadError::NotFound(err.to_string()),
            _ => {}
        }
    }
    classify_engine_message(&err.to_string())
}

/// Substring fallback for [`classify_engine_error`].
pub fn classify_engine_message(message: &str) -> DownloadError {
    const OUT_OF_MEMORY: &[&str] = &["Out of Memory", "out of memory", "OutOfMemory"];
    const FORBIDDEN: &[&str] = &["HTTP 403", "AccessDenied", "Access Denied", "Forbidden"];
    const MISSING: &[&str] = &[
        "HTTP 404",
        "NoSuchKey",
        "No such key",
        "NOT FOUND",
        "No files found",
        "No such file or directory",
    ];

    let msg = message.to_string();
    if OUT_OF_MEMORY.iter().any(|p| message.contains(p)) {
        DownloadError::ResourceExhausted(msg)
    } else if FORBIDDEN.iter().any(|p| message.contains(p)) {
        DownloadError::PermissionDenied(msg)
    } else if MISSING.iter().any(|p| message.contains(p)) {
        DownloadError::NotFound(msg)
    } else {
        DownloadError::Backend(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(DownloadError::invalid("x").status_code(), 400);
        assert_eq!(DownloadError::NotFound("x".into()).status_code(), 404);
        assert_eq!(DownloadError::PermissionDenied("x".into()).status_code(), 500);
        assert_eq!(DownloadError::ResourceExhausted("x".into()).status_code(), 503);
        assert_eq!(DownloadError::backend("x").status_code(), 500);
    }

    #[test]
    fn invalid_request_not_retryable() {
        assert!(!DownloadError::invalid("bad").is_retryable());
        assert!(!DownloadError::PermissionDenied("denied".into()).is_retryable());
    }

    #[test]
    fn resource_exhausted_retryable() {
        assert!(DownloadError::ResourceExhausted("oom".into()).is_retryable());
    }

    #[test]
    fn out_of_memory_message() {
        let err = classify_engine_message(
            "Out of Memory Error: could not allocate block of size 256.0 KiB (512.0 MiB/512.0 MiB used)",
        );
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn http_404_message_is_not_found() {
        let err = classify_engine_message(
            "IO Error: HTTP GET error on 'https://b.s3.amazonaws.com/dataset/x.parquet' (HTTP 404)",
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn no_such_key_is_not_found() {
        assert_eq!(
            classify_engine_message("HTTP Error: NoSuchKey").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn http_403_message_is_permission_denied() {
        let err = classify_engine_message("IO Error: HTTP HEAD error on 's3://b/k' (HTTP 403)");
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn other_message_is_backend() {
        let err = classify_engine_message("Binder Error: column does not exist");
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn truncation_keeps_message_text() {
        let err = DownloadError::backend("connection reset").into_truncated();
        assert_eq!(err.kind(), ErrorKind::StreamTruncated);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn client_message_hides_backend_detail() {
        let err = DownloadError::backend("secret bucket internals");
        assert!(!err.client_message().contains("secret"));
    }

    #[test]
    fn resource_exhausted_display_suggests_memory_limit() {
        let msg = DownloadError::ResourceExhausted("oom".into()).to_string();
        assert!(msg.contains("memory limit"));
    }
}
