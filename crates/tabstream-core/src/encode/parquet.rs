//! Columnar output: each batch becomes a self-contained parquet file

use arrow::array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::error::DownloadError;

/// Encode one batch as a complete parquet file (header magic, row group, footer).
///
/// A stream of several batches is therefore several concatenated files;
/// a zero-row batch yields a valid file that only carries the schema.
pub fn encode(batch: &RecordBatch, zstd_level: i32) -> Result<Vec<Bytes>, DownloadError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(zstd_level)?))
        .build();

    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props))?;
    writer.write(batch)?;
    let buf = writer.into_inner()?;
    Ok(vec![Bytes::from(buf)])
}

/// Read a single encoded file back into batches.
#[cfg(test)]
pub(crate) fn decode(data: Bytes) -> Result<Vec<RecordBatch>, DownloadError> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?.build()?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}
