//! Download request model: dataset name, output format, filter

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DownloadError;

/// Query parameter carrying the filter value
pub const FILTER_PARAM: &str = "organisation-entity";

/// Longest accepted dataset name
pub const MAX_DATASET_LEN: usize = 100;

/// Longest accepted filter value
pub const MAX_FILTER_LEN: usize = 100;

/// Validated dataset name: `[A-Za-z0-9_-]{1,100}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetName(String);

impl DatasetName {
    /// Validate a raw dataset segment.
    ///
    /// Traversal characters are rejected before anything else; a trailing
    /// `.<anything>` is then dropped so `sales.backup` resolves to `sales`.
    pub fn parse(raw: &str) -> Result<Self, DownloadError> {
        if raw.contains("..") || raw.contains('/') || raw.contains('\\') {
            return Err(DownloadError::invalid(
                "Dataset name cannot contain path separators or '..'",
            ));
        }
        let name = raw.split('.').next().unwrap_or_default();
        if name.is_empty() {
            return Err(DownloadError::invalid("Dataset name cannot be empty"));
        }
        if name.len() > MAX_DATASET_LEN {
            return Err(DownloadError::invalid(format!(
                "Dataset name longer than {MAX_DATASET_LEN} characters"
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(DownloadError::invalid(format!(
                "Dataset name '{name}' may only contain letters, digits, '_' and '-'"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output format requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Csv,
    Json,
    Parquet,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [Self::Csv, Self::Json, Self::Parquet];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Parquet => "parquet",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::Parquet => "application/octet-stream",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ext = s.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "parquet" => Ok(Self::Parquet),
            _ => Err(DownloadError::invalid(format!(
                "Unsupported format '{s}'. Expected one of: csv, json, parquet"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Single-column equality predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    /// Build a filter on `column`; an empty value means "no filter".
    pub fn on(column: &str, value: Option<&str>) -> Result<Option<Self>, DownloadError> {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        if value.chars().count() > MAX_FILTER_LEN {
            return Err(DownloadError::invalid(format!(
                "'{column}' longer than {MAX_FILTER_LEN} characters"
            )));
        }
        Ok(Some(Self {
            column: column.to_string(),
            value: value.to_string(),
        }))
    }
}

/// One validated download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub dataset: DatasetName,
    pub format: OutputFormat,
    pub filter: Option<Filter>,
}

impl DownloadRequest {
    pub fn new(dataset: DatasetName, format: OutputFormat, filter: Option<Filter>) -> Self {
        Self {
            dataset,
            format,
            filter,
        }
    }

    /// Parse `/{dataset}.{extension}` plus a urlencoded query string.
    ///
    /// The path must already be percent-decoded. Only the filter parameter is
    /// read from the query; anything else is ignored.
    pub fn from_path_and_query(
        path: &str,
        query: &str,
        filter_column: &str,
    ) -> Result<Self, DownloadError> {
        let (dataset, extension) = parse_path(path)?;
        let format: OutputFormat = extension.parse()?;
        let dataset = DatasetName::parse(dataset)?;
        let params = parse_query(query)?;
        let filter = Filter::on(filter_column, params.get(FILTER_PARAM).map(String::as_str))?;
        Ok(Self::new(dataset, format, filter))
    }

    /// Attachment filename, `{dataset}.{extension}`.
    pub fn filename(&self) -> String {
        format!("{}.{}", self.dataset, self.format.extension())
    }

    pub fn filter_value(&self) -> Option<&str> {
        self.filter.as_ref().map(|f| f.value.as_str())
    }
}

/// Split `/{dataset}.{extension}` on the last `.`.
pub fn parse_path(path: &str) -> Result<(&str, &str), DownloadError> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Err(DownloadError::invalid("Path cannot be empty"));
    }
    match path.rsplit_once('.') {
        Some((dataset, ext)) if !dataset.is_empty() && !ext.is_empty() => Ok((dataset, ext)),
        _ => Err(DownloadError::invalid(format!(
            "Invalid path format: '{path}'. Expected format: /{{dataset}}.{{extension}}"
        ))),
    }
}

/// Decode a urlencoded query string, keeping the first value of each key.
pub fn parse_query(query: &str) -> Result<HashMap<String, String>, DownloadError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
        .map_err(|e| DownloadError::invalid(format!("Malformed query string: {e}")))?;
    let mut params = HashMap::with_capacity(pairs.len());
    for (k, v) in pairs {
        params.entry(k).or_insert(v);
    }
    Ok(params)
}
