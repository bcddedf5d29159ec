//! Folder and file transfer between a cloud bucket and the local filesystem
//!
//! The helpers take the client explicitly. Construct one [`gcs::GcsClient`] at
//! startup and pass it to every call.

pub mod gcs;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::errors::{Result, ServingError};

pub use gcs::GcsClient;

/// Minimal object-store surface used by the helpers
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of every object whose name starts with `prefix`
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Object contents; `NotFound` or `PermissionDenied` when inaccessible
    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>>;

    /// Create or replace an object
    async fn put(&self, bucket: &str, name: &str, data: Vec<u8>) -> Result<()>;
}

/// Download a single object, overwriting `local_path`
pub async fn download_file(
    store: &dyn ObjectStore,
    bucket: &str,
    remote_path: &str,
    local_path: &Path,
) -> Result<()> {
    let data = store.get(bucket, remote_path).await?;
    tokio::fs::write(local_path, data)
        .await
        .map_err(|e| ServingError::FileError {
            path: local_path.display().to_string(),
            message: e.to_string(),
        })?;

    info!("Blob {} downloaded to {}", remote_path, local_path.display());
    Ok(())
}

/// Download every file under `remote_prefix` into the flat directory `local_dir`
///
/// Objects without a `.` in their name are folder placeholders and are skipped.
/// Nested paths are flattened to their base name. Returns the written files.
pub async fn download_folder(
    store: &dyn ObjectStore,
    bucket: &str,
    remote_prefix: &str,
    local_dir: &Path,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(local_dir).await?;

    let mut written = Vec::new();
    for name in store.list(bucket, remote_prefix).await? {
        if !name.contains('.') {
            debug!("Skipping placeholder {}", name);
            continue;
        }

        let file_name = name.rsplit('/').next().unwrap_or(name.as_str());
        let local_path = local_dir.join(file_name);
        download_file(store, bucket, &name, &local_path).await?;
        written.push(local_path);
    }

    info!(
        "Downloaded {} files from gs://{}/{} to {}",
        written.len(),
        bucket,
        remote_prefix,
        local_dir.display()
    );
    Ok(written)
}

/// Upload the regular files directly inside `local_dir` under `remote_prefix`
///
/// A zero-byte placeholder named `remote_prefix` is created first. Returns the
/// uploaded object names.
pub async fn upload_folder(
    store: &dyn ObjectStore,
    bucket: &str,
    remote_prefix: &str,
    local_dir: &Path,
) -> Result<Vec<String>> {
    if !local_dir.is_dir() {
        return Err(ServingError::FileError {
            path: local_dir.display().to_string(),
            message: "Not a directory".to_string(),
        });
    }

    store.put(bucket, remote_prefix, Vec::new()).await?;

    let mut uploaded = Vec::new();
    for path in list_files(local_dir)? {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let object_name = format!("{}/{}", remote_prefix.trim_end_matches('/'), file_name);
        let data = tokio::fs::read(&path).await?;
        store.put(bucket, &object_name, data).await?;
        debug!("Uploaded {} to gs://{}/{}", path.display(), bucket, object_name);
        uploaded.push(object_name);
    }

    info!(
        "Uploaded {} files from {} to gs://{}/{}",
        uploaded.len(),
        local_dir.display(),
        bucket,
        remote_prefix
    );
    Ok(uploaded)
}

/// Regular files directly inside `dir`, sorted by name
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| ServingError::FileError {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        if entry.path().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
