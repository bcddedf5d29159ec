//! Configuration management

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::errors::{Result, ServingError};

/// Default env file read before the process environment
pub const DEFAULT_ENV_FILE: &str = "model.env";

/// Handler reference packed into every archive unless `MAR_HANDLER` is set
pub const DEFAULT_MAR_HANDLER: &str = "handlers/handler.py";

/// Default Hugging Face compatible inference endpoint
pub const DEFAULT_TRANSLATION_API_URL: &str = "https://api-inference.huggingface.co";

/// Load `path` into the process environment
///
/// Runs before logging is set up so the file may carry `RUST_LOG`; the caller
/// reports the outcome once the subscriber exists. Variables already set in
/// the process win over the file.
pub fn load_env_file<P: AsRef<Path>>(path: P) -> dotenvy::Result<()> {
    dotenvy::from_path(path.as_ref())
}

/// Read the process environment through the `config` crate
fn environment() -> Result<Config> {
    Ok(Config::builder()
        .add_source(Environment::default())
        .build()?)
}

/// Settings for the packaging pipeline, all required
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Root of the per-model working directories
    pub local_model_dir: PathBuf,
    /// Bucket holding one folder of pretrained files per model
    pub models_bucket: String,
    /// Container registry the images are pushed to
    pub artifact_registry_repo_uri: String,
    /// Cloud project for storage and the model registry
    pub project_id: String,
    /// Vertex AI region
    pub region: String,
    /// Staging bucket for the registry
    pub staging_bucket: String,
    /// Handler reference packed into archives
    pub mar_handler: String,
}

impl PackagingConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(&environment()?)
    }

    /// Load from an already built configuration source
    pub fn from_source(source: &Config) -> Result<Self> {
        let config = Self {
            local_model_dir: PathBuf::from(required(source, "local_model_dir")?),
            models_bucket: required(source, "models_bucket")?,
            artifact_registry_repo_uri: required(source, "artifact_registry_repo_uri")?,
            project_id: required(source, "project_id")?,
            region: required(source, "region")?,
            staging_bucket: required(source, "staging_bucket")?,
            mar_handler: source
                .get_string("mar_handler")
                .unwrap_or_else(|_| DEFAULT_MAR_HANDLER.to_string()),
        };

        debug!(
            "Packaging config: models under {}, registry {}, project {} in {}, staging bucket {}",
            config.local_model_dir.display(),
            config.artifact_registry_repo_uri,
            config.project_id,
            config.region,
            config.staging_bucket
        );

        Ok(config)
    }
}

/// Settings for the storage helper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Project billed for storage requests
    pub project_id: String,
}

impl StorageSettings {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(&environment()?)
    }

    /// Load from an already built configuration source
    pub fn from_source(source: &Config) -> Result<Self> {
        Ok(Self {
            project_id: required(source, "project_id")?,
        })
    }
}

/// Settings for the remote translation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceApiConfig {
    /// Base URL; requests go to `<api_url>/models/<model_id>`
    pub api_url: String,
    /// Bearer token, if the endpoint needs one
    pub api_token: Option<String>,
}

impl Default for InferenceApiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_TRANSLATION_API_URL.to_string(),
            api_token: None,
        }
    }
}

impl InferenceApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let api_url = std::env::var("TRANSLATION_API_URL")
            .unwrap_or_else(|_| DEFAULT_TRANSLATION_API_URL.to_string());
        let api_token = std::env::var("TRANSLATION_API_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        Self { api_url, api_token }
    }
}

/// Fetch a non-empty string value or fail naming the variable
fn required(source: &Config, key: &str) -> Result<String> {
    let value = source.get_string(key)?;
    if value.trim().is_empty() {
        return Err(ServingError::MissingEnv {
            name: key.to_uppercase(),
        });
    }
    Ok(value)
}
