//! Delimited text via the arrow CSV writer

use arrow::array::RecordBatch;
use arrow::csv::WriterBuilder;
use arrow::error::ArrowError;
use bytes::Bytes;

/// Bytes per row to pre-allocate; avoids most regrowth for narrow tables
const ROW_CAPACITY_HINT: usize = 64;

/// Encode one batch as CSV, optionally preceded by the header row.
///
/// Fields are quoted only when they contain the delimiter, a quote or a
/// newline; embedded quotes are doubled.
pub fn encode(batch: &RecordBatch, include_header: bool) -> Result<Vec<Bytes>, ArrowError> {
    let buf = Vec::with_capacity(batch.num_rows().max(1) * ROW_CAPACITY_HINT);
    let mut writer = WriterBuilder::new().with_header(include_header).build(buf);
    writer.write(batch)?;
    let buf = writer.into_inner();
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Bytes::from(buf)])
}
