//! Function-runtime adapter: invocation events in, a manually streamed response out
//!
//! The runtime hands the handler a JSON event and a response stream. Status and
//! headers are committed before the first body byte, so only failures up to
//! the reader open can be reported as a JSON envelope. After that the body is
//! cut short and never ended.

use std::io::{self, Write};

use serde_json::{json, Value};
use tabstream_core::{spawn, DownloadError, DownloadRequest, StreamPipeline};

use crate::download_headers;

/// Path and raw query extracted from an invocation event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEvent {
    /// Percent-decoded request path
    pub path: String,
    /// Urlencoded query string, possibly empty
    pub query: String,
}

/// Extract the request from a Function URL, CloudFront or API Gateway event.
pub fn parse_event(event: &Value) -> Result<HttpEvent, DownloadError> {
    // Function URL
    if event.get("requestContext").and_then(|c| c.get("http")).is_some() {
        return Ok(HttpEvent {
            path: decode_path(str_field(event, "rawPath"))?,
            query: str_field(event, "rawQueryString").to_string(),
        });
    }

    // CloudFront
    if let Some(records) = event.get("Records") {
        let request = records
            .get(0)
            .and_then(|r| r.get("cf"))
            .and_then(|cf| cf.get("request"))
            .ok_or_else(|| DownloadError::invalid("CloudFront event carries no request"))?;
        return Ok(HttpEvent {
            path: decode_path(str_field(request, "uri"))?,
            query: str_field(request, "querystring").to_string(),
        });
    }

    // API Gateway: parameters arrive decoded as a map, or null
    if event.get("path").is_some() {
        let query = match event.get("queryStringParameters") {
            Some(Value::Object(params)) => params
                .iter()
                .map(|(k, v)| {
                    let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(&v))
                })
                .collect::<Vec<_>>()
                .join("&"),
            _ => String::new(),
        };
        return Ok(HttpEvent {
            path: decode_path(str_field(event, "path"))?,
            query,
        });
    }

    Err(DownloadError::invalid("Unsupported event format"))
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn decode_path(raw: &str) -> Result<String, DownloadError> {
    urlencoding::decode(raw)
        .map(|p| p.into_owned())
        .map_err(|e| DownloadError::invalid(format!("Path is not valid UTF-8: {e}")))
}

/// Response surface the function runtime provides.
pub trait ResponseStream: Send {
    fn set_status_code(&mut self, status: u16);
    fn set_headers(&mut self, headers: &[(&str, String)]);
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    /// Complete the response. Never called for a truncated body.
    fn end(&mut self) -> io::Result<()>;
}

/// Keeps the whole response in memory.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub ended: bool,
}

impl BufferedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl ResponseStream for BufferedResponse {
    fn set_status_code(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn set_headers(&mut self, headers: &[(&str, String)]) {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.to_string(), v.clone())));
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self) -> io::Result<()> {
        self.ended = true;
        Ok(())
    }
}

/// Streams the body into any writer; status and headers are logged.
pub struct WriterResponse<W: Write + Send> {
    writer: W,
    status: Option<u16>,
}

impl<W: Write + Send> WriterResponse<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            status: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl<W: Write + Send> ResponseStream for WriterResponse<W> {
    fn set_status_code(&mut self, status: u16) {
        log::info!("Status: {status}");
        self.status = Some(status);
    }

    fn set_headers(&mut self, headers: &[(&str, String)]) {
        for (name, value) in headers {
            log::info!("{name}: {value}");
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn end(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// How an invocation finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Full body written and the response ended
    Completed,
    /// Answered with an error envelope carrying this status
    Rejected(u16),
    /// Body cut short after the headers went out
    Truncated,
}

/// Handle one invocation.
///
/// Returns `Err` only when the response stream itself fails. A failed write
/// drops the chunk receiver, which cancels the reader.
pub async fn handle_event(
    pipeline: &StreamPipeline,
    event: &Value,
    response: &mut dyn ResponseStream,
) -> io::Result<Outcome> {
    log::debug!("Received event: {event}");

    let (request, mut rx) = match start(pipeline, event).await {
        Ok(started) => started,
        Err(e) => return write_error(response, &e),
    };

    response.set_status_code(200);
    response.set_headers(&download_headers(&request));

    while let Some(item) = rx.recv().await {
        match item {
            Ok(chunk) => response.write(&chunk)?,
            Err(e) => {
                log::error!("Response for {} truncated: {e}", request.dataset);
                return Ok(Outcome::Truncated);
            }
        }
    }
    response.end()?;
    log::info!("Completed streaming response for {}", request.dataset);
    Ok(Outcome::Completed)
}

async fn start(
    pipeline: &StreamPipeline,
    event: &Value,
) -> Result<(DownloadRequest, tokio::sync::mpsc::Receiver<tabstream_core::StreamItem>), DownloadError>
{
    let http = parse_event(event)?;
    let request = pipeline.parse_request(&http.path, &http.query)?;
    log::info!(
        "Parsed request: dataset={}, format={}, filter={}",
        request.dataset,
        request.format,
        request.filter_value().unwrap_or("-")
    );
    let prepared = pipeline.prepare(request.clone()).await?;
    let rx = spawn(prepared).await?;
    Ok((request, rx))
}

fn write_error(response: &mut dyn ResponseStream, err: &DownloadError) -> io::Result<Outcome> {
    let status = err.status_code();
    if status >= 500 {
        log::error!("{status}: {err}");
    } else {
        log::warn!("{status}: {err}");
    }
    let envelope = json!({ "error": err.client_message(), "statusCode": status });
    response.set_status_code(status);
    response.set_headers(&[("Content-Type", "application/json".to_string())]);
    response.write(envelope.to_string().as_bytes())?;
    response.end()?;
    Ok(Outcome::Rejected(status))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tabstream_core::{Config, LocalLocator};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn function_url_event() {
        let event = json!({
            "rawPath": "/my%20data.csv",
            "rawQueryString": "organisation-entity=org%2D1",
            "requestContext": { "http": { "method": "GET" } }
        });
        let http = parse_event(&event).unwrap();
        assert_eq!(http.path, "/my data.csv");
        assert_eq!(http.query, "organisation-entity=org%2D1");
    }

    #[test]
    fn cloudfront_event() {
        let event = json!({
            "Records": [{ "cf": { "request": {
                "uri": "/sales.json",
                "querystring": "organisation-entity=org-2"
            }}}]
        });
        let http = parse_event(&event).unwrap();
        assert_eq!(http.path, "/sales.json");
        assert_eq!(http.query, "organisation-entity=org-2");
    }

    #[test]
    fn api_gateway_event_reencodes_parameters() {
        let event = json!({
            "path": "/sales.parquet",
            "queryStringParameters": { "organisation-entity": "a&b=c" }
        });
        let http = parse_event(&event).unwrap();
        assert_eq!(http.path, "/sales.parquet");
        let params = tabstream_core::request::parse_query(&http.query).unwrap();
        assert_eq!(params["organisation-entity"], "a&b=c");
    }

    #[test]
    fn api_gateway_null_parameters() {
        let event = json!({ "path": "/sales.csv", "queryStringParameters": null });
        assert_eq!(parse_event(&event).unwrap().query, "");
    }

    #[test]
    fn unknown_event_rejected() {
        let err = parse_event(&json!({ "foo": 1 })).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("Unsupported event format"));
    }

    fn empty_pipeline(dir: &TempDir) -> StreamPipeline {
        let mut config = Config::default();
        config.storage.local_root = Some(dir.path().to_path_buf());
        let locator = LocalLocator::new(dir.path(), &config.storage.prefix);
        StreamPipeline::new(Arc::new(locator), Arc::new(config))
    }

    #[tokio::test]
    async fn bad_extension_writes_envelope() {
        let dir = TempDir::new().unwrap();
        let pipeline = empty_pipeline(&dir);
        let event = json!({ "path": "/sales.xml" });

        let mut response = BufferedResponse::default();
        let outcome = handle_event(&pipeline, &event, &mut response).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected(400));
        assert_eq!(response.status, Some(400));
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert!(response.ended);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["statusCode"], 400);
        assert!(body["error"].as_str().unwrap().contains("xml"));
    }

    #[tokio::test]
    async fn missing_dataset_writes_404_envelope() {
        let dir = TempDir::new().unwrap();
        let pipeline = empty_pipeline(&dir);
        let event = json!({ "path": "/absent.csv" });

        let mut response = BufferedResponse::default();
        let outcome = handle_event(&pipeline, &event, &mut response).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected(404));
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "Dataset 'absent' not found");
    }
}
