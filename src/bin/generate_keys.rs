//! Offline key generation for a local exposure file.
//!
//! Usage: `generate_keys <locations.csv|json> [output file] [csv|json]`
//!
//! Reads the same environment as the server (`KEYS_DATA_PATH`, ...). The output
//! format defaults to the output file's extension, then to the input format.

use anyhow::Context;
use rust_keys_server::config::Config;
use rust_keys_server::service::KeysService;
use rust_keys_server::transcoding::Format;
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let input = args
        .first()
        .map(PathBuf::from)
        .context("usage: generate_keys <locations file> [output file] [csv|json]")?;
    let output = args.get(1).map(PathBuf::from);

    let input_format = Format::from_extension(&input)
        .map_err(|e| anyhow::anyhow!("{}: {}", input.display(), e))?;
    let output_format = match (args.get(2), &output) {
        (Some(name), _) => name.parse::<Format>().map_err(|e| anyhow::anyhow!(e))?,
        (None, Some(path)) => Format::from_extension(path).unwrap_or(input_format),
        (None, None) => input_format,
    };

    let config = Config::from_env()?;
    let service = KeysService::initialize(&config)
        .map_err(|e| anyhow::anyhow!("failed to load reference data: {}", e))?;

    let payload = tokio::fs::read(&input)
        .await
        .with_context(|| format!("cannot read {}", input.display()))?;
    let (body, summary) = service
        .get_keys(&payload, input_format, output_format)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match &output {
        Some(path) => {
            tokio::fs::write(path, &body)
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("Wrote {} rows to {}", summary.total_rows(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&body)?;
        }
    }

    eprintln!(
        "success={} nomatch={} fail={} (locations={}, rejected={}, timed_out={})",
        summary.success,
        summary.no_match,
        summary.fail,
        summary.locations_received,
        summary.locations_rejected,
        summary.locations_timed_out
    );

    Ok(())
}
