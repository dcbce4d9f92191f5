//! tabstream-core: stream parquet datasets as CSV, JSON or parquet
//!
//! A request names a dataset, an output format and an optional equality
//! filter. The pipeline checks the dataset exists, opens one query engine
//! session that reads the file with the filter pushed down, and encodes each
//! row batch as it arrives so memory stays flat regardless of dataset size.

pub mod accumulator;
pub mod config;
pub mod encode;
pub mod error;
pub mod locator;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod request;
pub mod sink;
pub mod sql;
pub mod value;

// Re-exports for convenience
pub use config::{Config, ConfigError, EncoderSettings, ReaderSettings, StorageConfig};
pub use encode::{BatchPosition, FormatEncoder};
pub use error::{DownloadError, ErrorKind};
pub use locator::{locator_from_config, LocalLocator, Locator, RemoteAccess, S3Locator};
pub use logging::{init_logging, IndicatifLogger};
pub use pipeline::{
    collect_body, spawn, spawn_with, OpenStream, PipelineState, PreparedStream, StreamPipeline,
    StreamStats,
};
pub use reader::{BatchReader, BatchSource};
pub use request::{DatasetName, DownloadRequest, Filter, OutputFormat, FILTER_PARAM};
pub use sink::{ChannelSink, ChunkSink, StreamItem, VecSink, WriteSink};
