//! Main entry point for the opus-mt serving CLI

#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opus_mt_serving::cli::commands::{self, Commands};
use opus_mt_serving::core::config::{load_env_file, DEFAULT_ENV_FILE};

/// Package, publish and serve opus-mt translation models
#[derive(Parser, Debug)]
#[command(name = "opus-mt-serving", version, about, long_about = None)]
struct Args {
    /// Env file with the packaging configuration
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The env file may set RUST_LOG, so read it before building the filter
    let env_file = load_env_file(&args.env_file);

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}={}", env!("CARGO_CRATE_NAME"), log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match env_file {
        Ok(()) => info!("Loaded environment from {}", args.env_file.display()),
        Err(e) => debug!("No env file at {}: {}", args.env_file.display(), e),
    }

    match args.command {
        Commands::BuildPush {
            models,
            overwrite_mar,
            build_context,
        } => {
            commands::handle_build_push(models, overwrite_mar, build_context).await?;
        }
        Commands::Serve {
            model_dir,
            model_name,
            backend,
            model_id,
            host,
            port,
        } => {
            commands::handle_serve(model_dir, model_name, backend, model_id, host, port).await?;
        }
        Commands::Probe { url } => {
            commands::handle_probe(url).await?;
        }
        Commands::DownloadFile {
            bucket,
            remote,
            local,
        } => {
            commands::handle_download_file(bucket, remote, local).await?;
        }
        Commands::DownloadFolder {
            bucket,
            prefix,
            local,
        } => {
            commands::handle_download_folder(bucket, prefix, local).await?;
        }
        Commands::UploadFolder {
            bucket,
            prefix,
            local,
        } => {
            commands::handle_upload_folder(bucket, prefix, local).await?;
        }
    }

    Ok(())
}
