//! Fetch subcommand - stream one dataset to a file or stdout

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tabstream_core::{
    DatasetName, DownloadRequest, Filter, OutputFormat, StreamPipeline, StreamStats, WriteSink,
};

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Dataset name (without extension)
    pub dataset: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: FormatArg,

    /// Only rows whose filter column equals this value
    #[arg(long)]
    pub filter: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum FormatArg {
    Csv,
    Json,
    Parquet,
}

impl From<FormatArg> for OutputFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Parquet => OutputFormat::Parquet,
        }
    }
}

fn spinner(multi: &MultiProgress, label: &str) -> ProgressBar {
    let bar = multi.add(ProgressBar::new_spinner());
    let style = ProgressStyle::with_template(
        "{spinner:.green} {prefix:<24.cyan.bold} {binary_bytes:>10} {binary_bytes_per_sec:>12} {elapsed:>4}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

pub async fn run(
    args: FetchArgs,
    pipeline: Arc<StreamPipeline>,
    multi: Option<MultiProgress>,
) -> Result<()> {
    let filter_column = pipeline.config().filter_column.as_str().to_string();
    let request = DownloadRequest::new(
        DatasetName::parse(&args.dataset)?,
        args.format.into(),
        Filter::on(&filter_column, args.filter.as_deref())?,
    );
    let label = request.filename();

    let prepared = pipeline.prepare(request).await?;

    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let bar = multi.as_ref().map(|m| spinner(m, &label));
    let progress = bar.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<StreamStats> {
        let mut sink = WriteSink::new(writer);
        if let Some(bar) = progress {
            sink = sink.with_progress(move |bytes| bar.set_position(bytes));
        }
        let stats = prepared.open()?.run(&mut sink)?;
        sink.into_inner().context("Failed to flush output")?;
        Ok(stats)
    })
    .await
    .context("Fetch worker panicked")?;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    match result {
        Ok(stats) => {
            log::info!(
                "Fetched {label}: {} rows in {} batches, {} bytes",
                stats.rows,
                stats.batches,
                stats.bytes
            );
            Ok(())
        }
        Err(e) => {
            // Don't leave a truncated file behind
            if let Some(path) = &args.output {
                let _ = std::fs::remove_file(path);
            }
            Err(e.context(format!("Failed to fetch {label}")))
        }
    }
}
