//! Serving archive (`.mar`) construction through `torch-model-archiver`

use std::path::PathBuf;
use tracing::info;

use crate::core::errors::{Result, ServingError};
use crate::core::models::{ModelLayout, ModelName, WEIGHT_FILE};
use crate::core::process::{CommandRunner, CommandSpec};
use crate::storage::list_files;

/// Archiver executable
pub const ARCHIVER: &str = "torch-model-archiver";

/// Version stamped into every archive
pub const ARCHIVE_VERSION: &str = "1.0";

/// What `build_archive` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The archiver ran
    Built,
    /// An archive was already present
    Skipped,
}

/// Every file in the raw directory except the weight file
pub fn extra_files(layout: &ModelLayout) -> Result<Vec<PathBuf>> {
    Ok(list_files(layout.raw_dir())?
        .into_iter()
        .filter(|path| path.file_name().map_or(true, |name| name != WEIGHT_FILE))
        .collect())
}

/// `torch-model-archiver` invocation writing `<model>.mar` into the export directory
pub fn archiver_command(
    model: &ModelName,
    layout: &ModelLayout,
    extra_files: &[PathBuf],
    handler: &str,
) -> CommandSpec {
    let extra = extra_files
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(",");

    CommandSpec::new(ARCHIVER).args([
        "--force".to_string(),
        format!("--model-name={}", model),
        format!("--version={}", ARCHIVE_VERSION),
        format!("--serialized-file={}", layout.weight_file().display()),
        format!("--extra-files={}", extra),
        format!("--export-path={}", layout.export_dir().display()),
        format!("--handler={}", handler),
    ])
}

/// Build the archive unless it already exists and `overwrite` is off
pub async fn build_archive(
    runner: &dyn CommandRunner,
    model: &ModelName,
    layout: &ModelLayout,
    handler: &str,
    overwrite: bool,
) -> Result<ArchiveOutcome> {
    let archive = layout.archive_path();
    if archive.is_file() && !overwrite {
        info!("Mar file '{}' already built. Skipping build.", model);
        return Ok(ArchiveOutcome::Skipped);
    }

    let weights = layout.weight_file();
    if !weights.is_file() {
        return Err(ServingError::FileError {
            path: weights.display().to_string(),
            message: "Weight file missing".to_string(),
        });
    }

    info!("Building {}...", archive.display());
    let extra = extra_files(layout)?;
    runner
        .run_checked(&archiver_command(model, layout, &extra, handler))
        .await?;

    Ok(ArchiveOutcome::Built)
}
