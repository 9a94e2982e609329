//! Per-feature execution logs in `.factory/agents-context/<feature-id>.md`.
//!
//! A log only grows while its feature is unverified and is the sole context a
//! resumed execution starts from. Writers for one feature id are serialized by
//! the execution registry, so append is a plain read-concatenate-write.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::init::FactoryPaths;

/// Log file for `feature_id`: `<context_dir>/<percent-encoded id>.md`.
///
/// The encoding is one-to-one, so distinct ids never share a transcript, and
/// it escapes `/`, so an id can never leave the context directory.
pub fn log_path(paths: &FactoryPaths, feature_id: &str) -> PathBuf {
    paths
        .context_dir
        .join(format!("{}.md", urlencoding::encode(feature_id)))
}

/// Append `text` to the feature's log, creating the directory and file as needed.
pub async fn append(paths: &FactoryPaths, feature_id: &str, text: &str) -> Result<()> {
    tokio::fs::create_dir_all(&paths.context_dir)
        .await
        .with_context(|| format!("create {}", paths.context_dir.display()))?;
    let path = log_path(paths, feature_id);
    let mut contents = read(paths, feature_id).await.unwrap_or_default();
    contents.push_str(text);
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("write execution log {}", path.display()))
}

/// Read the feature's log. `None` means there is no prior context.
pub async fn read(paths: &FactoryPaths, feature_id: &str) -> Option<String> {
    let path = log_path(paths, feature_id);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Some(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read execution log");
            None
        }
    }
}

pub async fn exists(paths: &FactoryPaths, feature_id: &str) -> bool {
    tokio::fs::try_exists(log_path(paths, feature_id))
        .await
        .unwrap_or(false)
}

/// Remove the feature's log. Best-effort: a missing file is fine, anything
/// else is logged.
pub async fn delete(paths: &FactoryPaths, feature_id: &str) {
    let path = log_path(paths, feature_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "deleted execution log"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), err = %err, "failed to delete execution log"),
    }
}
