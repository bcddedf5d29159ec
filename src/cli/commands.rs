//! CLI command definitions and handlers

use clap::{builder::BoolishValueParser, ArgAction, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::core::auth::resolve_access_token;
use crate::core::config::{InferenceApiConfig, PackagingConfig, StorageSettings};
use crate::core::models::ModelName;
use crate::core::process::SystemRunner;
use crate::handler::{HandlerContext, InferenceApiLoader, PipelineLoader, TranslationHandler};
use crate::packaging::{PackagingOptions, PackagingPipeline, VertexRegistry};
use crate::server::probe::{run_probe, DEFAULT_PROBE_URL};
use crate::storage::{self, GcsClient};

/// Where translations are computed
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Marian model and tokenizer loaded from the model directory
    Marian,
    /// Remote Hugging Face compatible inference endpoint
    InferenceApi,
}

/// Commands for opus-mt serving
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build archives and images for models and register them on Vertex AI
    BuildPush {
        /// Comma separated model names (required)
        #[arg(long)]
        models: String,

        /// Rebuild archives that already exist
        #[arg(
            long = "overwrite-mar",
            alias = "overwrite_mar",
            num_args = 0..=1,
            default_value = "false",
            default_missing_value = "true",
            action = ArgAction::Set,
            value_parser = BoolishValueParser::new()
        )]
        overwrite_mar: bool,

        /// Docker build context
        #[arg(long, default_value = ".")]
        build_context: PathBuf,
    },

    /// Serve a model directory over HTTP
    Serve {
        /// Directory holding the model files (required)
        #[arg(long)]
        model_dir: PathBuf,

        /// Name the model is served under
        #[arg(long, default_value = "model")]
        model_name: String,

        /// Translation backend
        #[arg(long, value_enum, default_value_t = Backend::Marian)]
        backend: Backend,

        /// Hub model id for the inference-api backend, overriding config.json
        #[arg(long)]
        model_id: Option<String>,

        /// Bind address (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port (default: 8080)
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Send the integration request to a running server
    Probe {
        /// Prediction endpoint
        #[arg(long, default_value = DEFAULT_PROBE_URL)]
        url: String,
    },

    /// Download one object from a bucket
    DownloadFile {
        /// Source bucket
        #[arg(long)]
        bucket: String,

        /// Object path inside the bucket
        #[arg(long)]
        remote: String,

        /// Local destination file
        #[arg(long)]
        local: PathBuf,
    },

    /// Download the files under a prefix into a flat local directory
    DownloadFolder {
        /// Source bucket
        #[arg(long)]
        bucket: String,

        /// Object name prefix
        #[arg(long)]
        prefix: String,

        /// Local destination directory
        #[arg(long)]
        local: PathBuf,
    },

    /// Upload the files of a local directory under a prefix
    UploadFolder {
        /// Destination bucket
        #[arg(long)]
        bucket: String,

        /// Object name prefix, also created as an empty placeholder
        #[arg(long)]
        prefix: String,

        /// Local source directory
        #[arg(long)]
        local: PathBuf,
    },
}

/// Storage client built once for the whole command
async fn storage_client(runner: &SystemRunner) -> anyhow::Result<GcsClient> {
    let settings = StorageSettings::load()?;
    let token = resolve_access_token(runner).await?;
    Ok(GcsClient::new(&settings, token)?)
}

/// Handle build-push command
pub async fn handle_build_push(
    models: String,
    overwrite_mar: bool,
    build_context: PathBuf,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let start_time = Instant::now();
    let models = ModelName::parse_list(&models)?;
    if models.is_empty() {
        anyhow::bail!("No models given");
    }

    let config = PackagingConfig::load()?;
    let runner = SystemRunner;
    let token = resolve_access_token(&runner).await?;
    let store = GcsClient::new(
        &StorageSettings {
            project_id: config.project_id.clone(),
        },
        token.clone(),
    )?;
    let registry = VertexRegistry::new(&config.project_id, &config.region, token)?;

    info!("Packaging {} models (overwrite mar: {})", models.len(), overwrite_mar);

    let pb = ProgressBar::new(models.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"));

    let pipeline = PackagingPipeline::new(&config, &store, &runner, &registry)
        .with_build_context(build_context);
    let packaged = pipeline
        .run(&models, PackagingOptions { overwrite_mar }, |done| {
            pb.set_message(format!("Deployed: {}", done.model));
            pb.inc(1);
        })
        .await;

    let packaged = match packaged {
        Ok(packaged) => packaged,
        Err(e) => {
            pb.abandon_with_message("Failed");
            return Err(e.into());
        }
    };
    pb.finish_with_message("Completed");

    println!("\n✅ Packaging completed in {:?}", start_time.elapsed());
    for model in &packaged {
        println!("   {} → {}", model.model, model.image);
        println!("      archive: {}", model.archive_path.display());
        println!("      registry: {}", model.registered.resource_name);
    }

    Ok(())
}

/// Pipeline loader for the selected backend
pub fn pipeline_loader(
    backend: Backend,
    model_id: Option<String>,
) -> anyhow::Result<Arc<dyn PipelineLoader>> {
    match backend {
        #[cfg(feature = "marian")]
        Backend::Marian => Ok(Arc::new(crate::handler::MarianLoader)),
        #[cfg(not(feature = "marian"))]
        Backend::Marian => anyhow::bail!("Built without the marian feature, use --backend inference-api"),
        Backend::InferenceApi => {
            let mut loader = InferenceApiLoader::new(InferenceApiConfig::from_env());
            if let Some(model_id) = model_id {
                loader = loader.with_model_id(model_id);
            }
            Ok(Arc::new(loader))
        }
    }
}

/// Handle serve command
pub async fn handle_serve(
    model_dir: PathBuf,
    model_name: String,
    backend: Backend,
    model_id: Option<String>,
    host: String,
    port: u16,
) -> anyhow::Result<()> {
    use crate::server::run_server;

    if model_id.is_some() && backend != Backend::InferenceApi {
        anyhow::bail!("--model-id only applies to --backend inference-api");
    }

    let mut handler = TranslationHandler::new(pipeline_loader(backend, model_id)?);
    handler.initialize(&HandlerContext { model_dir }).await?;

    info!(
        "Starting model server for '{}' ({:?} backend) on {}:{}",
        model_name, backend, host, port
    );
    println!("🚀 Server starting on http://{}:{}", host, port);
    println!("📊 Predictions: http://{}:{}/predictions/{}", host, port, model_name);

    run_server(handler, model_name, host, port).await
}

/// Handle probe command
pub async fn handle_probe(url: String) -> anyhow::Result<()> {
    let predictions = run_probe(&url).await?;

    println!("✅ Received {} predictions:", predictions.len());
    for prediction in predictions {
        println!("   {}", prediction);
    }
    Ok(())
}

/// Handle download-file command
pub async fn handle_download_file(bucket: String, remote: String, local: PathBuf) -> anyhow::Result<()> {
    let client = storage_client(&SystemRunner).await?;
    storage::download_file(&client, &bucket, &remote, &local).await?;
    Ok(())
}

/// Handle download-folder command
pub async fn handle_download_folder(bucket: String, prefix: String, local: PathBuf) -> anyhow::Result<()> {
    let client = storage_client(&SystemRunner).await?;
    let files = storage::download_folder(&client, &bucket, &prefix, &local).await?;
    println!("✅ Downloaded {} files to {}", files.len(), local.display());
    Ok(())
}

/// Handle upload-folder command
pub async fn handle_upload_folder(bucket: String, prefix: String, local: PathBuf) -> anyhow::Result<()> {
    let client = storage_client(&SystemRunner).await?;
    let uploaded = storage::upload_folder(&client, &bucket, &prefix, &local).await?;
    println!("✅ Uploaded {} files to gs://{}/{}", uploaded.len(), bucket, prefix);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    fn overwrite_flag(args: &[&str]) -> bool {
        let mut argv = vec!["opus-mt-serving", "build-push", "--models", "a,b"];
        argv.extend_from_slice(args);
        match TestCli::try_parse_from(argv).unwrap().command {
            Commands::BuildPush { overwrite_mar, .. } => overwrite_mar,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_overwrite_flag_forms() {
        assert!(!overwrite_flag(&[]));
        assert!(overwrite_flag(&["--overwrite-mar"]));
        assert!(overwrite_flag(&["--overwrite_mar=True"]));
        assert!(!overwrite_flag(&["--overwrite-mar=false"]));
    }

    fn serve_args(args: &[&str]) -> (Backend, Option<String>) {
        let mut argv = vec!["opus-mt-serving", "serve", "--model-dir", "/opt/model"];
        argv.extend_from_slice(args);
        match TestCli::try_parse_from(argv).unwrap().command {
            Commands::Serve {
                backend, model_id, ..
            } => (backend, model_id),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_serve_defaults_to_local_model() {
        assert_eq!(serve_args(&[]), (Backend::Marian, None));
        assert_eq!(
            serve_args(&["--backend", "inference-api", "--model-id", "Helsinki-NLP/opus-mt-de-en"]),
            (
                Backend::InferenceApi,
                Some("Helsinki-NLP/opus-mt-de-en".to_string())
            )
        );
    }

    #[tokio::test]
    async fn test_model_id_requires_inference_api() {
        let err = handle_serve(
            PathBuf::from("/opt/model"),
            "model".to_string(),
            Backend::Marian,
            Some("Helsinki-NLP/opus-mt-de-en".to_string()),
            "127.0.0.1".to_string(),
            0,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--model-id"));
    }

    #[test]
    fn test_models_are_required() {
        assert!(TestCli::try_parse_from(["opus-mt-serving", "build-push"]).is_err());
    }
}
