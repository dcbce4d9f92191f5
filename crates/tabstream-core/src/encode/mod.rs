//! Row batch → output bytes, one module per format
//!
//! Each encoder is a pure function of one batch plus its position in the
//! stream. Stream-level framing (JSON brackets, the empty-result case) is
//! decided here so the pipeline only tracks whether data was seen.

pub mod csv;
pub mod json;
pub mod parquet;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use bytes::Bytes;

use crate::config::EncoderSettings;
use crate::error::DownloadError;
use crate::request::OutputFormat;

/// Body of an empty JSON result
pub const EMPTY_JSON_ARRAY: &[u8] = b"[\n]";

/// Closes a non-empty JSON array
pub const JSON_ARRAY_CLOSE: &[u8] = b"\n]";

/// Where a batch sits in its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    /// No data batch has been encoded before this one
    pub first_batch: bool,
}

impl BatchPosition {
    pub const FIRST: Self = Self { first_batch: true };
    pub const LATER: Self = Self { first_batch: false };
}

/// Encoder for one output format.
#[derive(Debug, Clone, Copy)]
pub enum FormatEncoder {
    Csv,
    Json,
    Parquet { zstd_level: i32 },
}

impl FormatEncoder {
    pub fn new(format: OutputFormat, settings: &EncoderSettings) -> Self {
        match format {
            OutputFormat::Csv => Self::Csv,
            OutputFormat::Json => Self::Json,
            OutputFormat::Parquet => Self::Parquet {
                zstd_level: settings.zstd_level,
            },
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            Self::Csv => OutputFormat::Csv,
            Self::Json => OutputFormat::Json,
            Self::Parquet { .. } => OutputFormat::Parquet,
        }
    }

    /// Encode one data batch.
    pub fn encode(
        &self,
        batch: &RecordBatch,
        position: BatchPosition,
    ) -> Result<Vec<Bytes>, DownloadError> {
        match self {
            Self::Csv => Ok(csv::encode(batch, position.first_batch)?),
            Self::Json => Ok(json::encode(batch, position.first_batch)?),
            Self::Parquet { zstd_level } => parquet::encode(batch, *zstd_level),
        }
    }

    /// Chunks that end the stream.
    ///
    /// With data: only JSON needs a closer. Without data: the header line,
    /// the empty array literal, or a zero-row file carrying `schema`.
    pub fn finish(&self, saw_data: bool, schema: &SchemaRef) -> Result<Vec<Bytes>, DownloadError> {
        match (self, saw_data) {
            (Self::Json, true) => Ok(vec![Bytes::from_static(JSON_ARRAY_CLOSE)]),
            (Self::Json, false) => Ok(vec![Bytes::from_static(EMPTY_JSON_ARRAY)]),
            (_, true) => Ok(Vec::new()),
            (_, false) => {
                let empty = RecordBatch::new_empty(schema.clone());
                self.encode(&empty, BatchPosition::FIRST)
            }
        }
    }
}
