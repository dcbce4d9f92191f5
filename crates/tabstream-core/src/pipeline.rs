//! Stream orchestration: existence check, reader open, encode loop, closing framing
//!
//! A stream moves through `Idle → Opening → Streaming → Closing → Done`, or
//! ends in `Failed` from `Opening` or `Streaming`. Everything up to and
//! including `Opening` can still become a structured error response; once
//! `Streaming` starts, failures only truncate the body.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::config::{Config, ReaderSettings};
use crate::encode::{BatchPosition, FormatEncoder};
use crate::error::DownloadError;
use crate::locator::{Locator, RemoteAccess};
use crate::reader::{BatchReader, BatchSource};
use crate::request::DownloadRequest;
use crate::sink::{ChannelSink, ChunkSink, StreamItem};

/// Chunks buffered between the worker and the response body.
///
/// One in flight means no batch is read until the previous one was taken.
pub const CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opening,
    Streaming,
    Closing,
    Done,
    Failed,
}

/// Per-stream progress. Never shared between requests.
#[derive(Debug, Default, Clone)]
pub struct StreamState {
    pub first_chunk_emitted: bool,
    pub batch_count: usize,
    pub total_rows: usize,
}

/// Outcome of a finished stream
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub batches: usize,
    pub rows: usize,
    pub bytes: u64,
    /// Consumer hung up before the end
    pub cancelled: bool,
    pub state: PipelineState,
}

/// Entry point shared by every adapter.
///
/// Holds only read-only, validated configuration; each stream opens its own
/// reader session.
#[derive(Clone)]
pub struct StreamPipeline {
    locator: Arc<dyn Locator>,
    config: Arc<Config>,
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("locator", &self.locator.describe())
            .finish_non_exhaustive()
    }
}

impl StreamPipeline {
    pub fn new(locator: Arc<dyn Locator>, config: Arc<Config>) -> Self {
        Self { locator, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locator(&self) -> &dyn Locator {
        self.locator.as_ref()
    }

    /// Parse a request using the configured filter column.
    pub fn parse_request(&self, path: &str, query: &str) -> Result<DownloadRequest, DownloadError> {
        DownloadRequest::from_path_and_query(path, query, self.config.filter_column.as_str())
    }

    /// Pre-stream phase: existence check and storage access for the reader.
    ///
    /// A missing dataset fails here with `NotFound`; no reader is opened.
    pub async fn prepare(&self, request: DownloadRequest) -> Result<PreparedStream, DownloadError> {
        log::debug!("{}: {:?} -> {:?}", request.dataset, PipelineState::Idle, PipelineState::Opening);
        if !self.locator.exists(&request.dataset).await? {
            return Err(DownloadError::NotFound(format!(
                "Dataset '{}' not found",
                request.dataset
            )));
        }
        let remote = self.locator.remote_access().await?;
        Ok(PreparedStream {
            uri: self.locator.resolve(&request.dataset),
            remote,
            settings: self.config.reader.clone(),
            encoder: FormatEncoder::new(request.format, &self.config.encoder),
            request,
        })
    }
}

/// A request that passed the existence check, ready to open on a blocking thread.
#[derive(Debug)]
pub struct PreparedStream {
    request: DownloadRequest,
    uri: String,
    remote: Option<RemoteAccess>,
    settings: ReaderSettings,
    encoder: FormatEncoder,
}

impl PreparedStream {
    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Open the reader session (blocking). `Opening → Streaming`, or `Failed`.
    pub fn open(self) -> Result<OpenStream<BatchReader>, DownloadError> {
        let reader = BatchReader::open(
            &self.uri,
            self.request.filter.as_ref(),
            self.remote.as_ref(),
            &self.settings,
        )
        .inspect_err(|e| log::warn!("{}: open failed: {e}", self.request.dataset))?;
        Ok(OpenStream::new(reader, self.encoder, self.request))
    }
}

/// An opened source, ready to stream into a sink.
pub struct OpenStream<S: BatchSource> {
    source: S,
    encoder: FormatEncoder,
    request: DownloadRequest,
    state: PipelineState,
}

impl<S: BatchSource> OpenStream<S> {
    pub fn new(source: S, encoder: FormatEncoder, request: DownloadRequest) -> Self {
        Self {
            source,
            encoder,
            request,
            state: PipelineState::Streaming,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("{}: {:?} -> {next:?}", self.request.dataset, self.state);
        self.state = next;
    }

    /// Stream every batch into `sink`, then the closing framing.
    ///
    /// The source is closed exactly once on every path. A sink reporting
    /// `BrokenPipe` cancels the stream without error; any other failure is
    /// returned as `StreamTruncated` and passed to [`ChunkSink::abort`].
    pub fn run(mut self, sink: &mut dyn ChunkSink) -> Result<StreamStats, DownloadError> {
        let started = Instant::now();
        let encoder = self.encoder;
        let mut st = StreamState::default();
        let mut bytes = 0u64;
        let mut cancelled = false;

        let scan = self.source.for_each_batch(&mut |batch| {
            if sink.is_closed() {
                cancelled = true;
                return Ok(ControlFlow::Break(()));
            }
            if batch.num_rows() == 0 {
                return Ok(ControlFlow::Continue(()));
            }
            let position = BatchPosition {
                first_batch: st.batch_count == 0,
            };
            let chunks = encoder.encode(&batch, position)?;
            st.batch_count += 1;
            st.total_rows += batch.num_rows();
            if forward(sink, chunks, &mut st, &mut bytes)? {
                Ok(ControlFlow::Continue(()))
            } else {
                cancelled = true;
                Ok(ControlFlow::Break(()))
            }
        });

        let result = match scan {
            Ok(()) if cancelled => Ok(()),
            Ok(()) => {
                self.transition(PipelineState::Closing);
                encoder
                    .finish(st.batch_count > 0, &self.source.schema())
                    .and_then(|chunks| forward(sink, chunks, &mut st, &mut bytes))
                    .map(|delivered| cancelled = !delivered)
            }
            Err(e) => Err(e),
        };
        self.source.close();

        self.transition(match result {
            Ok(()) => PipelineState::Done,
            Err(_) => PipelineState::Failed,
        });
        let stats = StreamStats {
            batches: st.batch_count,
            rows: st.total_rows,
            bytes,
            cancelled,
            state: self.state,
        };

        let req = &self.request;
        let filter = req.filter_value().unwrap_or("-");
        match result {
            Ok(()) if cancelled => {
                log::info!(
                    "{}.{} filter={filter}: cancelled by client after {} batches, {} rows, {bytes} bytes",
                    req.dataset,
                    req.format,
                    stats.batches,
                    stats.rows
                );
                Ok(stats)
            }
            Ok(()) => {
                log::info!(
                    "{}.{} filter={filter}: {} batches, {} rows, {bytes} bytes in {:.2?}",
                    req.dataset,
                    req.format,
                    stats.batches,
                    stats.rows,
                    started.elapsed()
                );
                Ok(stats)
            }
            Err(e) => {
                let e = e.into_truncated();
                log::error!(
                    "{}.{} filter={filter}: {e} after {} rows, {bytes} bytes sent",
                    req.dataset,
                    req.format,
                    stats.rows
                );
                sink.abort(&e);
                Err(e)
            }
        }
    }
}

/// Send chunks in order. `Ok(false)` when the consumer went away.
fn forward(
    sink: &mut dyn ChunkSink,
    chunks: Vec<bytes::Bytes>,
    st: &mut StreamState,
    bytes: &mut u64,
) -> Result<bool, DownloadError> {
    for chunk in chunks {
        let len = chunk.len() as u64;
        match sink.send_chunk(chunk) {
            Ok(()) => {
                *bytes += len;
                st.first_chunk_emitted = true;
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(false),
            Err(e) => return Err(DownloadError::backend(format!("sink write failed: {e}"))),
        }
    }
    Ok(true)
}

/// Run a prepared stream on the blocking pool.
///
/// Resolves once the reader is open: `Err` means nothing was sent and the
/// caller can still answer with a structured error. On success the receiver
/// yields body chunks; a final `Err` item means the body was truncated.
pub async fn spawn(prepared: PreparedStream) -> Result<mpsc::Receiver<StreamItem>, DownloadError> {
    spawn_with(move || prepared.open()).await
}

/// [`spawn`] over any source opener.
pub async fn spawn_with<S, F>(open: F) -> Result<mpsc::Receiver<StreamItem>, DownloadError>
where
    S: BatchSource + 'static,
    F: FnOnce() -> Result<OpenStream<S>, DownloadError> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let (tx, rx) = mpsc::channel::<StreamItem>(CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let stream = match open() {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        if ready_tx.send(Ok(())).is_err() {
            // Caller gone before the first byte; dropping `stream` closes the source
            return;
        }
        let mut sink = ChannelSink::new(tx);
        // Outcome already logged by `run`
        let _ = stream.run(&mut sink);
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(rx),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DownloadError::backend("stream worker exited before opening")),
    }
}

/// Collect a receiver into one buffer, failing on truncation.
pub async fn collect_body(mut rx: mpsc::Receiver<StreamItem>) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(item) = rx.recv().await {
        body.extend_from_slice(&item?);
    }
    Ok(body)
}
