//! Core data models shared by packaging and serving

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::core::errors::{Result, ServingError};

/// File passed to the archiver as the serialized model
pub const WEIGHT_FILE: &str = "pytorch_model.bin";

fn model_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"))
}

/// Model identifier, the join key across directories, archives, images and registry entries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelName(String);

impl ModelName {
    /// Validate and trim a model name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if !model_name_pattern().is_match(trimmed) {
            return Err(ServingError::InvalidModelName { name });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parse a comma separated list, ignoring empty entries
    pub fn parse_list(names: &str) -> Result<Vec<Self>> {
        names
            .split(',')
            .filter(|n| !n.trim().is_empty())
            .map(Self::new)
            .collect()
    }

    /// The name as given
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModelName {
    type Error = ServingError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ModelName> for String {
    fn from(name: ModelName) -> Self {
        name.0
    }
}

/// On-disk layout of one model under the local model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayout {
    export_dir: PathBuf,
    raw_dir: PathBuf,
    archive_path: PathBuf,
}

impl ModelLayout {
    /// Layout of `model` under `local_model_dir`
    pub fn new(local_model_dir: &Path, model: &ModelName) -> Self {
        let export_dir = local_model_dir.join(model.as_str());
        Self {
            raw_dir: export_dir.join("raw"),
            archive_path: export_dir.join(format!("{}.mar", model)),
            export_dir,
        }
    }

    /// `<LOCAL_MODEL_DIR>/<model>`
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// `<LOCAL_MODEL_DIR>/<model>/raw`
    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// `<LOCAL_MODEL_DIR>/<model>/<model>.mar`
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// `<LOCAL_MODEL_DIR>/<model>/raw/pytorch_model.bin`
    pub fn weight_file(&self) -> PathBuf {
        self.raw_dir.join(WEIGHT_FILE)
    }
}

/// Container image reference, always lower-case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    uri: String,
}

impl ImageRef {
    /// `<registry_uri>/<model>:<tag>`, lower-cased
    pub fn new(registry_uri: &str, model: &ModelName, tag: &str) -> Self {
        let uri = format!("{}/{}:{}", registry_uri.trim_end_matches('/'), model, tag);
        Self {
            uri: uri.to_lowercase(),
        }
    }

    /// Full reference including the tag
    pub fn as_str(&self) -> &str {
        &self.uri
    }

}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// One row of an inference batch, conventionally `[id, text]`
///
/// Only the second element is read; extra elements are carried along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instance(Vec<serde_json::Value>);

impl Instance {
    /// An `[id, text]` row
    pub fn new(id: impl Into<serde_json::Value>, text: impl Into<String>) -> Self {
        Self(vec![id.into(), serde_json::Value::String(text.into())])
    }

    /// The second element; non-string values are passed on as their JSON text
    pub fn text(&self) -> Result<String> {
        match self.0.get(1) {
            Some(serde_json::Value::String(text)) => Ok(text.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(ServingError::InvalidInput {
                message: format!(
                    "Instance has no text column: {}",
                    serde_json::Value::Array(self.0.clone())
                ),
            }),
        }
    }
}

/// Inference request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Rows to translate
    pub instances: Vec<Instance>,
}

/// Inference response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// One translation per request row, in order
    pub predictions: Vec<String>,
}

/// One translation produced by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationCandidate {
    /// Translated text
    pub translation_text: String,
}

/// Pipeline output for a single input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslationOutput {
    /// A single translation
    Single(TranslationCandidate),
    /// Several candidates, best first
    Candidates(Vec<TranslationCandidate>),
}

impl TranslationOutput {
    /// Output holding one translation
    pub fn single(text: impl Into<String>) -> Self {
        TranslationOutput::Single(TranslationCandidate {
            translation_text: text.into(),
        })
    }
}
