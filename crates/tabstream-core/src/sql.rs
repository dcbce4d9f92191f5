//! SQL generation for the per-stream query engine session.
//!
//! Only the filter value is user controlled, and it is always bound as a
//! parameter. The uri and column name come from validated config/request
//! data but are still quoted.

use crate::config::ReaderSettings;
use crate::locator::RemoteAccess;

/// Quote a string literal (`'` doubled).
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote an identifier (`"` doubled). Column names may contain hyphens.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full-dataset scan, with one `?` placeholder when `filter_column` is set.
pub fn select_dataset(uri: &str, filter_column: Option<&str>) -> String {
    let mut sql = format!("SELECT * FROM read_parquet({})", quote_literal(uri));
    if let Some(column) = filter_column {
        sql.push_str(&format!(" WHERE {} = ?", quote_ident(column)));
    }
    sql
}

/// Zero-row probe of `select`: resolves the schema and touches the file
/// (existence, permissions) without reading row data.
pub fn probe(select: &str) -> String {
    format!("SELECT * FROM ({select}) LIMIT 0")
}

/// Resource limits for the session. Empty when everything is left at engine defaults.
pub fn engine_settings(settings: &ReaderSettings) -> String {
    let mut stmts = Vec::new();
    if let Some(threads) = settings.threads {
        stmts.push(format!("SET threads = {threads};"));
    }
    if let Some(limit) = &settings.memory_limit {
        stmts.push(format!("SET memory_limit = {};", quote_literal(limit)));
    }
    if let Some(dir) = &settings.extension_directory {
        stmts.push(format!(
            "SET extension_directory = {};",
            quote_literal(&dir.to_string_lossy())
        ));
    }
    stmts.join("\n")
}

/// Remote object storage access: extension load, region, endpoint, credentials.
pub fn remote_setup(remote: &RemoteAccess) -> String {
    let mut stmts = vec![
        "INSTALL httpfs;".to_string(),
        "LOAD httpfs;".to_string(),
        format!("SET s3_region = {};", quote_literal(&remote.region)),
    ];
    if let Some(endpoint) = &remote.endpoint {
        stmts.push(format!("SET s3_endpoint = {};", quote_literal(endpoint)));
    }
    stmts.push(format!("SET s3_use_ssl = {};", remote.use_ssl));
    if remote.path_style {
        stmts.push("SET s3_url_style = 'path';".to_string());
    }
    if let Some(creds) = &remote.credentials {
        stmts.push(format!(
            "SET s3_access_key_id = {};",
            quote_literal(&creds.access_key_id)
        ));
        stmts.push(format!(
            "SET s3_secret_access_key = {};",
            quote_literal(&creds.secret_access_key)
        ));
        if let Some(token) = &creds.session_token {
            stmts.push(format!("SET s3_session_token = {};", quote_literal(token)));
        }
    }
    stmts.join("\n")
}
