//! JSON array of row objects, streamed one batch at a time

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::value::{Cell, CellReader};

const ARRAY_OPEN: &[u8] = b"[\n";
const SEPARATOR: &[u8] = b",\n";

/// Bytes per row to pre-allocate
const ROW_CAPACITY_HINT: usize = 128;

/// One row as a JSON object, keys in schema order.
struct Row<'r, 'a> {
    names: &'r [&'r str],
    readers: &'r [CellReader<'a>],
    row: usize,
}

impl Serialize for Row<'_, '_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.names.len()))?;
        for (name, reader) in self.names.iter().zip(self.readers) {
            let cell: Cell<'_> = reader.cell(self.row);
            map.serialize_entry(name, &cell)?;
        }
        map.end()
    }
}

/// Encode one batch as a slice of a JSON array.
///
/// The first batch opens the array; later batches start with the separator
/// that follows the previous batch's last record. The closing bracket is
/// emitted by [`crate::encode::FormatEncoder::finish`]. A zero-row batch
/// produces nothing so it can't disturb the framing.
pub fn encode(batch: &RecordBatch, first_batch: bool) -> Result<Vec<Bytes>, ArrowError> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }

    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let readers = batch
        .columns()
        .iter()
        .map(|c| CellReader::new(c.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut buf = Vec::with_capacity(batch.num_rows() * ROW_CAPACITY_HINT);
    buf.extend_from_slice(if first_batch { ARRAY_OPEN } else { SEPARATOR });
    for row in 0..batch.num_rows() {
        if row > 0 {
            buf.extend_from_slice(SEPARATOR);
        }
        let record = Row {
            names: &names,
            readers: &readers,
            row,
        };
        serde_json::to_writer(&mut buf, &record)
            .map_err(|e| ArrowError::JsonError(e.to_string()))?;
    }
    Ok(vec![Bytes::from(buf)])
}
