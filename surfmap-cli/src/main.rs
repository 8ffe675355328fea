mod args;

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use surfmap_recon::ReconPipeline;
use surfmap_types::{Asset, ReconOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use args::Args;

#[derive(Serialize)]
struct AssetCollection {
    assets: Vec<Asset>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut writer: Box<dyn Write> = match args.output {
        Some(ref path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create output file {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let options = ReconOptions {
        hosts: args.hosts.clone(),
        enable_scanning: args.scan,
        timeout: Duration::from_secs(600),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling discovery");
                cancel.cancel();
            }
        });
    }

    info!(hosts = args.hosts.len(), scan = args.scan, "starting asset discovery");
    let pipeline = ReconPipeline::new();
    let mut rx = pipeline.discover(options, cancel);

    if args.stream {
        while let Some(asset) = rx.recv().await {
            let line = serde_json::to_string(&asset)?;
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
    } else {
        let mut assets = Vec::new();
        while let Some(asset) = rx.recv().await {
            assets.push(asset);
        }
        info!(count = assets.len(), "discovery finished");
        let collection = AssetCollection { assets };
        serde_json::to_writer_pretty(&mut writer, &collection)?;
        writeln!(writer)?;
    }

    Ok(())
}
