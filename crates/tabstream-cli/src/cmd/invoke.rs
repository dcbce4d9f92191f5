//! Invoke subcommand - run the function handler on a saved event

use std::io::{self, BufWriter, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;
use tabstream_core::StreamPipeline;
use tabstream_http::lambda::{handle_event, Outcome, WriterResponse};

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Event JSON file (`-` reads stdin)
    pub event: PathBuf,
}

pub async fn run(args: InvokeArgs, pipeline: Arc<StreamPipeline>) -> Result<()> {
    let raw = if args.event.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.event)
            .with_context(|| format!("Failed to read event file: {}", args.event.display()))?
    };
    let event: Value = serde_json::from_str(&raw).context("Event is not valid JSON")?;

    let mut response = WriterResponse::new(BufWriter::new(io::stdout()));
    let outcome = handle_event(&pipeline, &event, &mut response)
        .await
        .context("Failed to write response")?;

    match outcome {
        Outcome::Completed => Ok(()),
        Outcome::Rejected(status) => bail!("Request rejected with status {status}"),
        Outcome::Truncated => bail!("Response truncated"),
    }
}
