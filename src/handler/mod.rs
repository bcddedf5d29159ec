//! Model-server handler for translation models
//!
//! The handler follows a fixed lifecycle: [`TranslationHandler::initialize`]
//! loads a pipeline once, after which each request goes through
//! `preprocess` → `inference` → `postprocess`.

pub mod marian;
pub mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::{Result, ServingError};
use crate::core::models::{Instance, TranslationOutput};

#[cfg(feature = "marian")]
pub use marian::MarianLoader;
pub use pipeline::{InferenceApiLoader, PipelineLoader, TranslationPipeline};

/// Properties the host passes to `initialize`
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Directory holding the unpacked model files
    pub model_dir: PathBuf,
}

enum HandlerState {
    Uninitialized,
    Ready(Box<dyn TranslationPipeline>),
}

/// Adapter between `[id, text]` batches and a translation pipeline
pub struct TranslationHandler {
    loader: Arc<dyn PipelineLoader>,
    state: HandlerState,
}

impl TranslationHandler {
    /// Handler that loads its pipeline with `loader` on `initialize`
    pub fn new(loader: Arc<dyn PipelineLoader>) -> Self {
        Self {
            loader,
            state: HandlerState::Uninitialized,
        }
    }

    /// Whether `initialize` has completed
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandlerState::Ready(_))
    }

    /// Load the pipeline from `context.model_dir`; later calls are ignored
    pub async fn initialize(&mut self, context: &HandlerContext) -> Result<()> {
        if self.is_ready() {
            warn!("Handler already initialized, ignoring {}", context.model_dir.display());
            return Ok(());
        }

        let pipeline = self.loader.load(&context.model_dir).await?;
        self.state = HandlerState::Ready(pipeline);
        Ok(())
    }

    fn pipeline(&self) -> Result<&dyn TranslationPipeline> {
        match &self.state {
            HandlerState::Ready(pipeline) => Ok(&**pipeline),
            HandlerState::Uninitialized => Err(ServingError::NotInitialized),
        }
    }

    /// Take the column we translate
    pub fn preprocess(&self, batch: &[Instance]) -> Result<Vec<String>> {
        self.pipeline()?;
        batch.iter().map(Instance::text).collect()
    }

    /// Run the pipeline over the whole batch
    pub async fn inference(&self, texts: &[String]) -> Result<Vec<TranslationOutput>> {
        self.pipeline()?.translate(texts).await
    }

    /// One string per pipeline output
    pub fn postprocess(&self, outputs: Vec<TranslationOutput>) -> Result<Vec<String>> {
        self.pipeline()?;
        normalize_outputs(outputs)
    }

    /// Run the full request lifecycle for one batch
    pub async fn handle(&self, batch: &[Instance]) -> Result<Vec<String>> {
        let texts = self.preprocess(batch)?;
        let outputs = self.inference(&texts).await?;
        if outputs.len() != texts.len() {
            return Err(ServingError::InvalidResponseError {
                message: format!(
                    "Pipeline returned {} outputs for {} inputs",
                    outputs.len(),
                    texts.len()
                ),
            });
        }

        let predictions = self.postprocess(outputs)?;
        debug!("Translated batch of {}", predictions.len());
        Ok(predictions)
    }
}

/// Flatten pipeline outputs to one string each, first candidate wins
pub fn normalize_outputs(outputs: Vec<TranslationOutput>) -> Result<Vec<String>> {
    outputs
        .into_iter()
        .enumerate()
        .map(|(index, output)| match output {
            TranslationOutput::Single(candidate) => Ok(candidate.translation_text),
            TranslationOutput::Candidates(candidates) => candidates
                .into_iter()
                .next()
                .map(|candidate| candidate.translation_text)
                .ok_or_else(|| ServingError::InvalidResponseError {
                    message: format!("No translation candidates for item {}", index),
                }),
        })
        .collect()
}
