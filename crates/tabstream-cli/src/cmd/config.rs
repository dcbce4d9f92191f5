//! Config subcommand - print the effective configuration

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use tabstream_core::Config;

pub fn run(config: &Config) {
    eprintln!("\n{}", table(config));
}

fn table(config: &Config) -> Table {
    let storage = &config.storage;
    let reader = &config.reader;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    match &storage.local_root {
        Some(root) => {
            table.add_row(vec!["Local data dir", &root.display().to_string()]);
        }
        None => {
            table.add_row(vec!["Bucket", storage.bucket.as_deref().unwrap_or("not set")]);
        }
    }
    table.add_row(vec!["Prefix", storage.normalized_prefix()]);
    table.add_row(vec!["Region", &storage.region]);
    table.add_row(vec![
        "Endpoint",
        storage.endpoint.as_deref().unwrap_or("default"),
    ]);
    table.add_row(vec!["Use SSL", &storage.effective_use_ssl().to_string()]);
    table.add_row(vec!["Path style", &storage.effective_path_style().to_string()]);
    table.add_row(vec!["Chunk size", &format!("{} rows", reader.chunk_size)]);
    table.add_row(vec![
        "Engine threads",
        &reader
            .threads
            .map_or_else(|| "engine default".to_string(), |t| t.to_string()),
    ]);
    table.add_row(vec![
        "Memory limit",
        reader.memory_limit.as_deref().unwrap_or("engine default"),
    ]);
    table.add_row(vec!["Parquet zstd level", &config.encoder.zstd_level.to_string()]);
    table.add_row(vec!["Filter column", config.filter_column.as_str()]);
    table
}
