//! opus-mt serving - package, publish and serve translation models
//!
//! This library builds serving archives and container images for pretrained
//! translation models, registers them with Vertex AI, and hosts them behind
//! the model-server prediction contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod core;
pub mod handler;
pub mod packaging;
pub mod server;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use core::{
    config::{InferenceApiConfig, PackagingConfig, StorageSettings},
    errors::{Result, ServingError},
    models::{ImageRef, InferenceRequest, InferenceResponse, Instance, ModelName, TranslationOutput},
};

pub use handler::{HandlerContext, TranslationHandler};
pub use packaging::{PackagingOptions, PackagingPipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
