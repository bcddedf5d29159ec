//! Sequential acquire → archive → tag → build & push → register pipeline

use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::core::config::PackagingConfig;
use crate::core::errors::Result;
use crate::core::models::{ImageRef, ModelLayout, ModelName};
use crate::core::process::CommandRunner;
use crate::packaging::archive::{build_archive, ArchiveOutcome};
use crate::packaging::image::{build_and_push, generate_tag};
use crate::packaging::registry::{registration_mode, ModelRegistry, ModelUpload, RegisteredModel};
use crate::storage::{download_folder, ObjectStore};

/// Per-run switches
#[derive(Debug, Clone, Copy, Default)]
pub struct PackagingOptions {
    /// Rebuild archives that already exist
    pub overwrite_mar: bool,
}

/// Summary of one fully processed model
#[derive(Debug, Clone, Serialize)]
pub struct PackagedModel {
    /// Model name
    pub model: String,
    /// Whether the pretrained files were fetched in this run
    pub downloaded: bool,
    /// Whether the archiver ran in this run
    pub archive_built: bool,
    /// Location of the `.mar`
    pub archive_path: PathBuf,
    /// Pushed image reference
    pub image: String,
    /// Registry entry the image was uploaded to
    pub registered: RegisteredModel,
}

/// Packaging pipeline over injected collaborators
pub struct PackagingPipeline<'a> {
    config: &'a PackagingConfig,
    store: &'a dyn ObjectStore,
    runner: &'a dyn CommandRunner,
    registry: &'a dyn ModelRegistry,
    build_context: PathBuf,
}

impl<'a> PackagingPipeline<'a> {
    /// Pipeline building images from the current directory
    pub fn new(
        config: &'a PackagingConfig,
        store: &'a dyn ObjectStore,
        runner: &'a dyn CommandRunner,
        registry: &'a dyn ModelRegistry,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            registry,
            build_context: PathBuf::from("."),
        }
    }

    /// Directory handed to `docker build`
    pub fn with_build_context(mut self, context: impl Into<PathBuf>) -> Self {
        self.build_context = context.into();
        self
    }

    /// Process every model in order, stopping at the first failure
    pub async fn run<F>(
        &self,
        models: &[ModelName],
        options: PackagingOptions,
        mut on_packaged: F,
    ) -> Result<Vec<PackagedModel>>
    where
        F: FnMut(&PackagedModel),
    {
        let mut packaged = Vec::with_capacity(models.len());
        for model in models {
            let result = self.package(model, options).await?;
            on_packaged(&result);
            packaged.push(result);
        }
        Ok(packaged)
    }

    /// Run every stage for one model
    pub async fn package(&self, model: &ModelName, options: PackagingOptions) -> Result<PackagedModel> {
        let layout = ModelLayout::new(&self.config.local_model_dir, model);

        let downloaded = self.acquire(model, &layout).await?;

        let outcome = build_archive(
            self.runner,
            model,
            &layout,
            &self.config.mar_handler,
            options.overwrite_mar,
        )
        .await?;

        let tag = generate_tag(Local::now().naive_local());
        let image = ImageRef::new(&self.config.artifact_registry_repo_uri, model, &tag);
        build_and_push(self.runner, &image, model, &self.build_context).await?;

        let mode = registration_mode(self.registry, model).await?;
        let registered = self
            .registry
            .upload(&ModelUpload::new(model.clone(), image.clone(), mode))
            .await?;
        info!("Deployed model {} to Vertex AI as {}", model, registered.resource_name);

        Ok(PackagedModel {
            model: model.to_string(),
            downloaded,
            archive_built: outcome == ArchiveOutcome::Built,
            archive_path: layout.archive_path().to_path_buf(),
            image: image.to_string(),
            registered,
        })
    }

    /// Download the raw model unless its directory exists
    async fn acquire(&self, model: &ModelName, layout: &ModelLayout) -> Result<bool> {
        if layout.raw_dir().is_dir() {
            info!("Model '{}' already downloaded. Skipping download.", model);
            return Ok(false);
        }

        info!("Model '{}' Downloading...", model);
        download_folder(
            self.store,
            &self.config.models_bucket,
            model.as_str(),
            layout.raw_dir(),
        )
        .await?;
        Ok(true)
    }
}
