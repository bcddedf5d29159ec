//! Translation pipelines the handler delegates to

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::config::InferenceApiConfig;
use crate::core::errors::{Result, ServingError};
use crate::core::models::TranslationOutput;

/// Pretrained model configuration file expected in every model directory
pub const MODEL_CONFIG_FILE: &str = "config.json";

/// A loaded model + tokenizer that translates a batch of texts
#[async_trait]
pub trait TranslationPipeline: Send + Sync {
    /// One output per input text, in input order
    async fn translate(&self, texts: &[String]) -> Result<Vec<TranslationOutput>>;
}

/// Builds a pipeline from a model directory
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    /// Load the pipeline; fails when the directory lacks what the pipeline needs
    async fn load(&self, model_dir: &Path) -> Result<Box<dyn TranslationPipeline>>;
}

#[derive(Deserialize)]
struct PretrainedConfig {
    #[serde(rename = "_name_or_path")]
    name_or_path: Option<String>,
}

/// Resolve the hub model id from `config.json`, falling back to the directory name
///
/// `_name_or_path` is ignored when it holds a filesystem path, which is what
/// a locally saved model records there.
pub async fn resolve_model_id(model_dir: &Path) -> Result<String> {
    let config_path = model_dir.join(MODEL_CONFIG_FILE);
    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| ServingError::FileError {
            path: config_path.display().to_string(),
            message: e.to_string(),
        })?;
    let config: PretrainedConfig = serde_json::from_str(&content)?;

    if let Some(name) = config.name_or_path.map(|n| n.trim().to_string()) {
        if is_hub_id(&name).await {
            return Ok(name);
        }
        debug!("Ignoring local path {} recorded in {}", name, config_path.display());
    }

    model_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ServingError::ConfigError {
            message: format!("Cannot derive a model id from {}", model_dir.display()),
        })
}

/// `name` or `owner/name`, and not something on the local filesystem
async fn is_hub_id(name: &str) -> bool {
    let path = Path::new(name);
    if name.is_empty()
        || path.is_absolute()
        || name.starts_with('.')
        || name.starts_with('~')
        || name.contains('\\')
        || name.split('/').count() > 2
        || name.split('/').any(str::is_empty)
    {
        return false;
    }
    !tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Loader for pipelines served by a Hugging Face compatible inference API
///
/// Only `config.json` is read from the model directory; the weights stay
/// with the remote service.
#[derive(Debug, Clone)]
pub struct InferenceApiLoader {
    config: InferenceApiConfig,
    model_id: Option<String>,
}

impl InferenceApiLoader {
    /// Loader using `config` for the endpoint and token
    pub fn new(config: InferenceApiConfig) -> Self {
        Self {
            config,
            model_id: None,
        }
    }

    /// Use this model id instead of the one recorded in `config.json`
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// The override if set, otherwise the id recorded in the model directory
    pub async fn model_id_for(&self, model_dir: &Path) -> Result<String> {
        match &self.model_id {
            Some(model_id) => Ok(model_id.clone()),
            None => resolve_model_id(model_dir).await,
        }
    }
}

#[async_trait]
impl PipelineLoader for InferenceApiLoader {
    async fn load(&self, model_dir: &Path) -> Result<Box<dyn TranslationPipeline>> {
        let model_id = self.model_id_for(model_dir).await?;

        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build()?;

        info!("Loaded translation pipeline for {} from {}", model_id, model_dir.display());
        Ok(Box::new(InferenceApiPipeline {
            client,
            url: format!("{}/models/{}", self.config.api_url.trim_end_matches('/'), model_id),
            api_token: self.config.api_token.clone(),
            model_id,
        }))
    }
}

/// Pipeline forwarding batches to a remote inference endpoint
#[derive(Debug, Clone)]
pub struct InferenceApiPipeline {
    client: reqwest::Client,
    url: String,
    api_token: Option<String>,
    model_id: String,
}

#[async_trait]
impl TranslationPipeline for InferenceApiPipeline {
    async fn translate(&self, texts: &[String]) -> Result<Vec<TranslationOutput>> {
        let body = json!({
            "inputs": texts,
            "parameters": { "truncation": true },
            "options": { "wait_for_model": true },
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        debug!("Translating {} texts with {}", texts.len(), self.model_id);
        let response = request.send().await.map_err(|e| ServingError::NetworkError {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServingError::from_status(status.as_u16(), &self.url, body));
        }

        response
            .json()
            .await
            .map_err(|e| ServingError::InvalidResponseError {
                message: e.to_string(),
            })
    }
}
