//! Marian translation pipeline loaded from the files of a model directory
//!
//! The model and its SentencePiece tokenizer are built once on a dedicated
//! thread. Batches reach that thread through a channel, so the async runtime
//! never blocks on generation.

use std::path::{Path, PathBuf};

use crate::core::errors::{Result, ServingError};
use crate::handler::pipeline::MODEL_CONFIG_FILE;

/// Tokenizer vocabulary
pub const VOCAB_FILE: &str = "vocab.json";

/// SentencePiece models accepted for the source language, in preference order
pub const SPIECE_FILES: &[&str] = &["source.spm", "spiece.model"];

/// Converted weights accepted by the runtime, in preference order
pub const WEIGHT_FILES: &[&str] = &["rust_model.ot", "model.safetensors"];

/// Resolved paths of everything a Marian model needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarianFiles {
    /// Model configuration (`config.json`)
    pub config: PathBuf,
    /// Tokenizer vocabulary (`vocab.json`)
    pub vocab: PathBuf,
    /// Source SentencePiece model
    pub spiece: PathBuf,
    /// Converted weights
    pub weights: PathBuf,
}

impl MarianFiles {
    /// Find the model files inside `model_dir`, naming every missing one
    pub fn locate(model_dir: &Path) -> Result<Self> {
        let config = first_file(model_dir, &[MODEL_CONFIG_FILE]);
        let vocab = first_file(model_dir, &[VOCAB_FILE]);
        let spiece = first_file(model_dir, SPIECE_FILES);
        let weights = first_file(model_dir, WEIGHT_FILES);

        match (config, vocab, spiece, weights) {
            (Ok(config), Ok(vocab), Ok(spiece), Ok(weights)) => Ok(Self {
                config,
                vocab,
                spiece,
                weights,
            }),
            (config, vocab, spiece, weights) => {
                let missing: Vec<String> = [config, vocab, spiece, weights]
                    .into_iter()
                    .filter_map(|found| found.err())
                    .collect();
                Err(ServingError::FileError {
                    path: model_dir.display().to_string(),
                    message: format!("Missing model files: {}", missing.join(", ")),
                })
            }
        }
    }
}

/// First candidate present in `dir`, or the candidate list for the error message
fn first_file(dir: &Path, candidates: &[&str]) -> std::result::Result<PathBuf, String> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| candidates.join(" or "))
}

#[cfg(feature = "marian")]
pub use runtime::{MarianLoader, MarianPipeline};

#[cfg(feature = "marian")]
mod runtime {
    use async_trait::async_trait;
    use rust_bert::pipelines::common::{ModelResource, ModelType};
    use rust_bert::pipelines::translation::{Language, TranslationConfig, TranslationModel};
    use rust_bert::resources::LocalResource;
    use std::path::Path;
    use tch::Device;
    use tokio::sync::{mpsc, oneshot};
    use tracing::{debug, error, info};

    use super::MarianFiles;
    use crate::core::errors::{Result, ServingError};
    use crate::core::models::TranslationOutput;
    use crate::handler::pipeline::{PipelineLoader, TranslationPipeline};

    struct TranslateJob {
        texts: Vec<String>,
        reply: oneshot::Sender<Result<Vec<TranslationOutput>>>,
    }

    fn model_error(e: impl std::fmt::Display) -> ServingError {
        ServingError::ModelError {
            message: e.to_string(),
        }
    }

    fn build_model(files: &MarianFiles) -> Result<TranslationModel> {
        let config = TranslationConfig::new(
            ModelType::Marian,
            ModelResource::Torch(Box::new(LocalResource::from(files.weights.clone()))),
            LocalResource::from(files.config.clone()),
            LocalResource::from(files.vocab.clone()),
            Some(LocalResource::from(files.spiece.clone())),
            Vec::<Language>::new(),
            Vec::<Language>::new(),
            Device::cuda_if_available(),
        );
        TranslationModel::new(config).map_err(model_error)
    }

    /// Loads a Marian model and tokenizer from the model directory
    #[derive(Debug, Clone, Default)]
    pub struct MarianLoader;

    #[async_trait]
    impl PipelineLoader for MarianLoader {
        async fn load(&self, model_dir: &Path) -> Result<Box<dyn TranslationPipeline>> {
            let files = MarianFiles::locate(model_dir)?;
            let (requests, mut inbox) = mpsc::unbounded_channel::<TranslateJob>();
            let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

            info!("Loading Marian model from {}", files.weights.display());
            std::thread::Builder::new()
                .name("marian".to_string())
                .spawn(move || {
                    let model = match build_model(&files) {
                        Ok(model) => {
                            let _ = ready_tx.send(Ok(()));
                            model
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    while let Some(job) = inbox.blocking_recv() {
                        debug!("Translating batch of {}", job.texts.len());
                        let result: Result<Vec<TranslationOutput>> = model
                            .translate(&job.texts, None::<Language>, None::<Language>)
                            .map(|texts| {
                                texts.into_iter().map(TranslationOutput::single).collect()
                            })
                            .map_err(model_error);
                        if job.reply.send(result).is_err() {
                            error!("Translation caller went away before the reply");
                        }
                    }
                })?;

            ready_rx
                .await
                .map_err(|_| model_error("Model thread exited while loading"))??;

            info!("Loaded translation pipeline from {}", model_dir.display());
            Ok(Box::new(MarianPipeline { requests }))
        }
    }

    /// Handle to the model thread
    pub struct MarianPipeline {
        requests: mpsc::UnboundedSender<TranslateJob>,
    }

    #[async_trait]
    impl TranslationPipeline for MarianPipeline {
        async fn translate(&self, texts: &[String]) -> Result<Vec<TranslationOutput>> {
            let (reply, response) = oneshot::channel();
            self.requests
                .send(TranslateJob {
                    texts: texts.to_vec(),
                    reply,
                })
                .map_err(|_| model_error("Model thread is not running"))?;

            response
                .await
                .map_err(|_| model_error("Model thread dropped the request"))?
        }
    }
}
