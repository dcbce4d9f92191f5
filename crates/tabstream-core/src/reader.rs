//! Row batch source: one DuckDB session per stream over a parquet file

use std::ops::ControlFlow;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use duckdb::{params_from_iter, Connection};

use crate::accumulator::BatchAccumulator;
use crate::config::ReaderSettings;
use crate::error::{classify_engine_error, DownloadError};
use crate::locator::RemoteAccess;
use crate::request::Filter;
use crate::sql;

/// Per-batch callback. `Break` stops the scan without error.
pub type BatchVisitor<'a> = dyn FnMut(RecordBatch) -> Result<ControlFlow<()>, DownloadError> + 'a;

/// Lazily produced row batches sharing one schema.
pub trait BatchSource {
    fn schema(&self) -> SchemaRef;

    /// Feed batches to `visit` in order until the source is exhausted,
    /// `visit` breaks, or an error occurs.
    fn for_each_batch(&mut self, visit: &mut BatchVisitor<'_>) -> Result<(), DownloadError>;

    /// Release the underlying session. Idempotent.
    fn close(&mut self);
}

/// Reads one parquet dataset through an in-memory DuckDB connection.
///
/// The filter is evaluated by the engine so row groups whose statistics
/// exclude the value are never fetched. Each stream runs one data query over
/// the whole file, never one per row group. `open` also runs a zero-row
/// probe of the same statement to learn the schema and to fail before the
/// response is committed.
pub struct BatchReader {
    conn: Option<Connection>,
    select: String,
    params: Vec<String>,
    schema: SchemaRef,
    chunk_size: usize,
}

impl std::fmt::Debug for BatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReader")
            .field("select", &self.select)
            .field("chunk_size", &self.chunk_size)
            .field("open", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

fn engine(e: duckdb::Error) -> DownloadError {
    classify_engine_error(&e)
}

impl BatchReader {
    /// Configure a fresh session and probe the dataset schema.
    ///
    /// Any configuration statement failing aborts the open. On error the
    /// connection is dropped before returning.
    pub fn open(
        uri: &str,
        filter: Option<&Filter>,
        remote: Option<&RemoteAccess>,
        settings: &ReaderSettings,
    ) -> Result<Self, DownloadError> {
        let conn = Connection::open_in_memory().map_err(engine)?;

        let limits = sql::engine_settings(settings);
        if !limits.is_empty() {
            conn.execute_batch(&limits).map_err(engine)?;
        }
        if let Some(remote) = remote {
            if remote.credentials.is_none() {
                log::warn!("Opening {uri} without storage credentials");
            }
            conn.execute_batch(&sql::remote_setup(remote))
                .map_err(engine)?;
        }

        let select = sql::select_dataset(uri, filter.map(|f| f.column.as_str()));
        let params: Vec<String> = filter.map(|f| f.value.clone()).into_iter().collect();

        let schema = {
            let mut stmt = conn.prepare(&sql::probe(&select)).map_err(engine)?;
            let probe = stmt
                .query_arrow(params_from_iter(params.iter()))
                .map_err(engine)?;
            probe.get_schema()
        };
        log::debug!(
            "Opened {uri} ({} columns, filter: {})",
            schema.fields().len(),
            filter.map_or("none", |f| f.value.as_str())
        );

        Ok(Self {
            conn: Some(conn),
            select,
            params,
            schema,
            chunk_size: settings.chunk_size,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

impl BatchSource for BatchReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// One parameterized query per stream; engine chunks are coalesced into
    /// batches of at most `chunk_size` rows.
    ///
    /// Errors raised by the engine after the first chunk end the stream
    /// early rather than surfacing here; the arrow stream interface has no
    /// error channel. Such a failure, out-of-memory included, is
    /// indistinguishable from a complete scan: the stream finishes as `Done`
    /// with its closing framing and is logged as a success, so it cannot be
    /// alerted on as a truncation.
    fn for_each_batch(&mut self, visit: &mut BatchVisitor<'_>) -> Result<(), DownloadError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DownloadError::backend("reader already closed"))?;
        let mut stmt = conn.prepare(&self.select).map_err(engine)?;
        let stream = stmt
            .stream_arrow(params_from_iter(self.params.iter()), self.schema.clone())
            .map_err(engine)?;

        let mut acc = BatchAccumulator::new(self.chunk_size);
        for chunk in stream {
            for batch in acc.push(chunk)? {
                if visit(batch)?.is_break() {
                    return Ok(());
                }
            }
        }
        if let Some(batch) = acc.take_batch()? {
            visit(batch)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                log::warn!("Query engine close failed: {e}");
            }
        }
    }
}

impl Drop for BatchReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    /// 30 rows, `org-1`..`org-3` cycling
    fn write_dataset(dir: &Path) -> String {
        let path = dir.join("small.parquet");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "COPY (SELECT i AS id, concat('org-', (i % 3) + 1) AS \"organisation-entity\" \
             FROM range(30) t(i)) TO '{}' (FORMAT PARQUET)",
            path.display()
        ))
        .unwrap();
        path.to_string_lossy().into_owned()
    }

    fn settings(chunk_size: usize) -> ReaderSettings {
        ReaderSettings {
            chunk_size,
            threads: Some(1),
            ..ReaderSettings::default()
        }
    }

    fn collect(reader: &mut BatchReader) -> Vec<RecordBatch> {
        let mut out = Vec::new();
        reader
            .for_each_batch(&mut |b| {
                out.push(b);
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        out
    }

    #[test]
    fn schema_from_probe() {
        let dir = TempDir::new().unwrap();
        let uri = write_dataset(dir.path());
        let reader = BatchReader::open(&uri, None, None, &settings(10)).unwrap();
        let names: Vec<&str> = reader
            .schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["id", "organisation-entity"]);
    }

    #[test]
    fn batches_bounded_by_chunk_size() {
        let dir = TempDir::new().unwrap();
        let uri = write_dataset(dir.path());
        let mut reader = BatchReader::open(&uri, None, None, &settings(7)).unwrap();
        let batches = collect(&mut reader);
        assert!(batches.iter().all(|b| b.num_rows() <= 7 && b.num_rows() > 0));
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 30);
    }

    #[test]
    fn filter_is_bound_parameter() {
        let dir = TempDir::new().unwrap();
        let uri = write_dataset(dir.path());
        let filter = Filter {
            column: "organisation-entity".to_string(),
            value: "org-2".to_string(),
        };
        let mut reader = BatchReader::open(&uri, Some(&filter), None, &settings(100)).unwrap();
        let rows: usize = collect(&mut reader).iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 10);

        let hostile = Filter {
            column: "organisation-entity".to_string(),
            value: "x' OR '1'='1".to_string(),
        };
        let mut reader = BatchReader::open(&uri, Some(&hostile), None, &settings(100)).unwrap();
        assert!(collect(&mut reader).is_empty());
    }

    #[test]
    fn break_stops_scan() {
        let dir = TempDir::new().unwrap();
        let uri = write_dataset(dir.path());
        let mut reader = BatchReader::open(&uri, None, None, &settings(5)).unwrap();
        let mut seen = 0;
        reader
            .for_each_batch(&mut |_| {
                seen += 1;
                Ok(ControlFlow::Break(()))
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let uri = dir.path().join("absent.parquet");
        let err = BatchReader::open(&uri.to_string_lossy(), None, None, &settings(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let uri = write_dataset(dir.path());
        let mut reader = BatchReader::open(&uri, None, None, &settings(10)).unwrap();
        reader.close();
        assert!(reader.is_closed());
        reader.close();
        let err = reader
            .for_each_batch(&mut |_| Ok(ControlFlow::Continue(())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn engine_batches_use_workspace_arrow() {
        // Only compiles while the engine links the same arrow major as the encoders
        fn as_workspace(batch: duckdb::arrow::record_batch::RecordBatch) -> RecordBatch {
            batch
        }
        let dir = TempDir::new().unwrap();
        let uri = write_dataset(dir.path());
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM read_parquet('{uri}')"))
            .unwrap();
        let batches: Vec<RecordBatch> = stmt.query_arrow([]).unwrap().map(as_workspace).collect();
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 30);
        let schema: SchemaRef = batches[0].schema();
        assert_eq!(schema.field(1).name(), "organisation-entity");
    }
}
