//! Pre-stream failures as JSON responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tabstream_core::{DownloadError, ErrorKind};

/// Error body: `{"detail": message}`
#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A [`DownloadError`] raised before any body byte was sent.
#[derive(Debug)]
pub struct ApiError(pub DownloadError);

impl From<DownloadError> for ApiError {
    fn from(e: DownloadError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.0.kind() {
            ErrorKind::InvalidRequest | ErrorKind::NotFound => {
                log::warn!("{status}: {}", self.0)
            }
            _ => log::error!("{status}: {}", self.0),
        }
        let body = ErrorBody {
            detail: self.0.client_message(),
        };
        (status, Json(body)).into_response()
    }
}
