//! Chunk sinks: where encoded bytes go once the pipeline produces them

use std::io::{self, Write};

use bytes::Bytes;
use tokio::sync::mpsc::Sender;

/// Item carried to the response body. A trailing `Err` means the body was cut short.
pub type StreamItem = Result<Bytes, io::Error>;

/// Destination for encoded chunks.
///
/// A sink that can no longer accept data (client gone, pipe closed) returns
/// `BrokenPipe`; the pipeline treats that as cancellation, not failure.
pub trait ChunkSink {
    fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Consumer is gone; checked between batches so no further batch is read.
    fn is_closed(&self) -> bool {
        false
    }

    /// Report a failure after data was sent. Best effort.
    fn abort(&mut self, _err: &dyn std::error::Error) {}
}

/// Sink feeding a bounded async channel from a blocking worker.
///
/// `blocking_send` parks the worker while the channel is full, which is what
/// ties engine reads to the client's consumption rate.
pub struct ChannelSink {
    sender: Sender<StreamItem>,
    bytes_sent: u64,
}

impl std::fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSink")
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

impl ChannelSink {
    pub fn new(sender: Sender<StreamItem>) -> Self {
        Self {
            sender,
            bytes_sent: 0,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl ChunkSink for ChannelSink {
    fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        let len = chunk.len() as u64;
        self.sender
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))?;
        self.bytes_sent += len;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn abort(&mut self, err: &dyn std::error::Error) {
        // Receiver may already be gone
        let _ = self.sender.blocking_send(Err(io::Error::other(err.to_string())));
    }
}

/// Sink over any `Write` (files, stdout, in-memory buffers).
pub struct WriteSink<W: Write> {
    writer: W,
    bytes_written: u64,
    on_chunk: Option<Box<dyn FnMut(u64) + Send>>,
}

impl<W: Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
            on_chunk: None,
        }
    }

    /// Call `f` with the running byte total after each chunk.
    pub fn with_progress(mut self, f: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> ChunkSink for WriteSink<W> {
    fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.writer.write_all(&chunk)?;
        self.bytes_written += chunk.len() as u64;
        if let Some(f) = self.on_chunk.as_mut() {
            f(self.bytes_written);
        }
        Ok(())
    }
}

/// Collects chunks in memory. Used by the function adapter and tests.
#[derive(Debug, Default)]
pub struct VecSink {
    pub chunks: Vec<Bytes>,
    /// Stop accepting after this many chunks (simulates a client hanging up)
    pub close_after: Option<usize>,
}

impl VecSink {
    pub fn closing_after(n: usize) -> Self {
        Self {
            chunks: Vec::new(),
            close_after: Some(n),
        }
    }

    pub fn concat(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

impl ChunkSink for VecSink {
    fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.chunks.push(chunk);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.close_after.is_some_and(|n| self.chunks.len() >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_closes_after_limit() {
        let mut sink = VecSink::closing_after(1);
        sink.send_chunk(Bytes::from_static(b"a")).unwrap();
        assert!(sink.is_closed());
        let err = sink.send_chunk(Bytes::from_static(b"b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(sink.concat(), b"a");
    }

    #[test]
    fn write_sink_counts_and_reports() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sink = WriteSink::new(Vec::new()).with_progress(move |n| seen2.lock().unwrap().push(n));
        sink.send_chunk(Bytes::from_static(b"abc")).unwrap();
        sink.send_chunk(Bytes::from_static(b"de")).unwrap();
        assert_eq!(sink.bytes_written(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![3, 5]);
        assert_eq!(sink.into_inner().unwrap(), b"abcde");
    }

    #[test]
    fn channel_sink_reports_broken_pipe_when_receiver_dropped() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        assert!(sink.is_closed());
        let err = sink.send_chunk(Bytes::from_static(b"x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);
        sink.send_chunk(Bytes::from_static(b"1")).unwrap();
        sink.send_chunk(Bytes::from_static(b"22")).unwrap();
        assert_eq!(sink.bytes_sent(), 3);
        drop(sink);
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), Bytes::from_static(b"22"));
        assert!(rx.blocking_recv().is_none());
    }
}
