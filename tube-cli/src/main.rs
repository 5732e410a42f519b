mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::process;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, LogFormat},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
};

const DEFAULT_FILTER: &str =
    "tube_cli=info,stream_resolver=info,playlist_continuity=info,synthetic_dash=info";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        let error_json = serde_json::json!({
            "status": "error",
            "message": format!("{e:#}"),
        });
        eprintln!("{error_json}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet, args.log_format);

    let config = AppConfig::load(args.config.as_deref())?;
    let executor = CommandExecutor::new(config, args.instance, args.output)?;

    match args.command {
        Commands::Resolve { video_id, force } => executor.resolve(&video_id, force).await?,
        Commands::Manifest { video_id } => executor.manifest(&video_id).await?,
        Commands::Playlist {
            playlist_id,
            target,
            index,
            shuffle,
            steps,
        } => {
            executor
                .playlist(&playlist_id, target.as_deref(), index, shuffle, steps)
                .await?
        }
        Commands::Config => executor.show_config()?,
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, format: LogFormat) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
