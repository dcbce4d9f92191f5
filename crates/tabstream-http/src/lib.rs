//! tabstream-http: HTTP server and function-runtime adapters over the stream pipeline

pub mod error;
pub mod lambda;
pub mod routes;

pub use error::ApiError;
pub use routes::build_router;

use tabstream_core::DownloadRequest;

/// Service name reported by the health check
pub const SERVICE_NAME: &str = "tabstream";

/// Successful downloads may be cached by intermediaries for an hour
pub const CACHE_CONTROL: &str = "public, max-age=3600";

/// Headers of a successful download, identical for both adapters.
pub fn download_headers(request: &DownloadRequest) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", request.format.content_type().to_string()),
        (
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", request.filename()),
        ),
        ("Cache-Control", CACHE_CONTROL.to_string()),
        ("X-Dataset", request.dataset.to_string()),
        ("X-Format", request.format.to_string()),
    ]
}
