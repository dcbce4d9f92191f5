use std::path::Path;
use std::sync::Arc;

use arrow::array::{AsArray, RecordBatch};
use bytes::Bytes;
use duckdb::Connection;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

use tabstream_core::{
    collect_body, spawn, BatchReader, Config, DownloadError, ErrorKind, FormatEncoder,
    LocalLocator, OpenStream, OutputFormat, StreamPipeline, VecSink,
};

const HEADER: &str = "id,organisation-entity,name,status,value,created_at";

/// `test-dataset`: 100 rows, `organisation-entity` cycling org-1..org-5 (20 each),
/// written in row groups of 25 so the filter has statistics to prune with.
fn write_test_dataset(root: &Path) {
    let dir = root.join("dataset");
    std::fs::create_dir_all(&dir).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&format!(
        "COPY (SELECT i + 1 AS id, \
                      concat('org-', (i % 5) + 1) AS \"organisation-entity\", \
                      concat('Record ', i + 1) AS name, \
                      CASE WHEN i % 2 = 0 THEN 'active' ELSE 'inactive' END AS status, \
                      CAST(i AS DOUBLE) * 1.5 AS value, \
                      DATE '2024-01-01' + CAST(i AS INTEGER) AS created_at \
               FROM range(100) t(i)) \
         TO '{}/test-dataset.parquet' (FORMAT PARQUET, ROW_GROUP_SIZE 25)",
        dir.display()
    ))
    .unwrap();
}

fn test_config(root: &Path, chunk_size: usize) -> Config {
    let mut config = Config::default();
    config.storage.local_root = Some(root.to_path_buf());
    config.reader.chunk_size = chunk_size;
    config.reader.threads = Some(1);
    config.validate().unwrap();
    config
}

fn fixture(chunk_size: usize) -> (TempDir, StreamPipeline) {
    let dir = TempDir::new().unwrap();
    write_test_dataset(dir.path());
    let config = test_config(dir.path(), chunk_size);
    let locator = LocalLocator::new(dir.path(), &config.storage.prefix);
    let pipeline = StreamPipeline::new(Arc::new(locator), Arc::new(config));
    (dir, pipeline)
}

async fn fetch(pipeline: &StreamPipeline, path: &str, query: &str) -> Result<Vec<u8>, DownloadError> {
    let request = pipeline.parse_request(path, query)?;
    let prepared = pipeline.prepare(request).await?;
    let rx = spawn(prepared).await?;
    Ok(collect_body(rx).await.unwrap())
}

async fn fetch_text(pipeline: &StreamPipeline, path: &str, query: &str) -> String {
    String::from_utf8(fetch(pipeline, path, query).await.unwrap()).unwrap()
}

fn read_parquet(data: Vec<u8>) -> Vec<RecordBatch> {
    ParquetRecordBatchReaderBuilder::try_new(Bytes::from(data))
        .unwrap()
        .build()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[tokio::test]
async fn csv_full_dataset_has_one_header() {
    let (_dir, pipeline) = fixture(30);
    let text = fetch_text(&pipeline, "/test-dataset.csv", "").await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 101);
    assert_eq!(lines[0], HEADER);
    assert_eq!(text.matches(HEADER).count(), 1);
    assert!(lines[1].starts_with("1,org-1,Record 1,active,"), "{}", lines[1]);
    assert!(lines[1].ends_with(",2024-01-01"), "{}", lines[1]);
}

#[tokio::test]
async fn csv_filtered_to_one_organisation() {
    let (_dir, pipeline) = fixture(30);
    let text = fetch_text(&pipeline, "/test-dataset.csv", "organisation-entity=org-1").await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 21);
    for line in &lines[1..] {
        assert!(line.contains("org-1"), "{line}");
        for other in ["org-2", "org-3", "org-4", "org-5"] {
            assert!(!line.contains(other), "{line}");
        }
    }
}

#[tokio::test]
async fn json_full_dataset() {
    let (_dir, pipeline) = fixture(30);
    let body = fetch(&pipeline, "/test-dataset.json", "").await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 100);
    for row in rows {
        let obj = row.as_object().unwrap();
        let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        for col in ["id", "organisation-entity", "name", "status", "value", "created_at"] {
            assert!(keys.contains(&col), "missing {col}");
        }
    }
    assert_eq!(rows[0]["created_at"], "2024-01-01");
    assert_eq!(rows[99]["id"], 100);
}

#[tokio::test]
async fn json_filtered() {
    let (_dir, pipeline) = fixture(7);
    let body = fetch(&pipeline, "/test-dataset.json", "organisation-entity=org-3").await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|r| r["organisation-entity"] == "org-3"));
}

#[tokio::test]
async fn unmatched_filter_yields_empty_results() {
    let (_dir, pipeline) = fixture(30);
    let q = "organisation-entity=nonexistent-org";

    let csv = fetch_text(&pipeline, "/test-dataset.csv", q).await;
    assert_eq!(csv, format!("{HEADER}\n"));

    let json = fetch(&pipeline, "/test-dataset.json", q).await.unwrap();
    assert_eq!(json, b"[\n]");

    let parquet = fetch(&pipeline, "/test-dataset.parquet", q).await.unwrap();
    assert_eq!(&parquet[..4], b"PAR1");
    let batches = read_parquet(parquet);
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 0);
}

#[tokio::test]
async fn unmatched_filter_parquet_keeps_schema() {
    let (_dir, pipeline) = fixture(30);
    let data = fetch(&pipeline, "/test-dataset.parquet", "organisation-entity=none").await.unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(data)).unwrap();
    let names: Vec<String> = reader
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names.join(","), HEADER);
}

#[tokio::test]
async fn parquet_starts_with_magic() {
    let (_dir, pipeline) = fixture(30);
    let data = fetch(&pipeline, "/test-dataset.parquet", "organisation-entity=org-1").await.unwrap();
    assert_eq!(&data[..4], b"PAR1");

    // 20 rows fit one batch, so the body is a single file
    let batches = read_parquet(data);
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 20);
    let orgs = batches[0].column(1).as_string::<i32>();
    assert!(orgs.iter().all(|v| v == Some("org-1")));
}

#[tokio::test]
async fn parquet_chunks_are_independent_files() {
    let (_dir, pipeline) = fixture(30);
    let request = pipeline.parse_request("/test-dataset.parquet", "").unwrap();
    let mut rx = spawn(pipeline.prepare(request).await.unwrap()).await.unwrap();

    let mut rows = 0;
    let mut files = 0;
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk.unwrap();
        assert_eq!(&chunk[..4], b"PAR1");
        assert_eq!(&chunk[chunk.len() - 4..], b"PAR1");
        rows += read_parquet(chunk.to_vec()).iter().map(|b| b.num_rows()).sum::<usize>();
        files += 1;
    }
    assert_eq!(rows, 100);
    assert_eq!(files, 4);
}

#[tokio::test]
async fn missing_dataset_is_not_found() {
    let (_dir, pipeline) = fixture(30);
    let err = fetch(&pipeline, "/nonexistent.csv", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.status_code(), 404);
    assert!(err.to_string().contains("nonexistent"));
}

#[tokio::test]
async fn invalid_requests_rejected_before_storage() {
    let (_dir, pipeline) = fixture(30);
    for (path, query) in [
        ("/test-dataset.xml", ""),
        ("/../etc.csv", ""),
        ("/a\\b.csv", ""),
        ("/bad name.csv", ""),
        ("/test-dataset", ""),
    ] {
        let err = fetch(&pipeline, path, query).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{path}");
        assert_eq!(err.status_code(), 400);
    }
}

#[tokio::test]
async fn repeated_requests_are_byte_identical() {
    let (_dir, pipeline) = fixture(30);
    for format in OutputFormat::ALL {
        let path = format!("/test-dataset.{format}");
        let a = fetch(&pipeline, &path, "organisation-entity=org-2").await.unwrap();
        let b = fetch(&pipeline, &path, "organisation-entity=org-2").await.unwrap();
        assert_eq!(a, b, "{format}");
    }
}

#[test]
fn blocking_path_into_vec_sink() {
    let dir = TempDir::new().unwrap();
    write_test_dataset(dir.path());
    let config = test_config(dir.path(), 9);
    let uri = dir.path().join("dataset/test-dataset.parquet");

    let reader = BatchReader::open(&uri.to_string_lossy(), None, None, &config.reader).unwrap();
    let request = tabstream_core::DownloadRequest::from_path_and_query(
        "/test-dataset.csv",
        "",
        config.filter_column.as_str(),
    )
    .unwrap();
    let encoder = FormatEncoder::new(request.format, &config.encoder);

    let mut sink = VecSink::default();
    let stats = OpenStream::new(reader, encoder, request).run(&mut sink).unwrap();
    assert_eq!(stats.rows, 100);
    assert_eq!(stats.batches, 12);
    let text = String::from_utf8(sink.concat()).unwrap();
    assert_eq!(text.lines().count(), 101);
    assert_eq!(stats.bytes as usize, text.len());
}
