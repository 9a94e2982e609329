//! Feature list persistence (`.factory/feature_list.json`).
//!
//! Reads never fail: a missing or malformed file loads as an empty list. Writes
//! rewrite the whole file with only the stable fields. There is no file lock;
//! callers must hold the registry claim for the feature they update.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::atomic::write_atomic_async;
use super::execution_log;
use super::init::FactoryPaths;
use crate::core::ids::assign_ids;
use crate::core::selector::find_feature as find_in;
use crate::error::FeatureNotFoundError;
use crate::feature::{Feature, FeatureRecord, FeatureStatus};

/// Load all features in file order.
///
/// Records without an id get a generated one, which is written back right away
/// so the id stays stable across loads.
#[instrument(skip_all, fields(path = %paths.feature_list_path.display()))]
pub async fn load_features(paths: &FactoryPaths) -> Vec<Feature> {
    let records = match read_records(paths).await {
        Ok(Some(records)) => records,
        Ok(None) => {
            debug!("no feature list, nothing to do");
            return Vec::new();
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to load feature list");
            return Vec::new();
        }
    };

    let assigned = assign_ids(records, Utc::now().timestamp_millis());
    if !assigned.generated.is_empty() {
        info!(ids = ?assigned.generated, "assigned ids to features");
        if let Err(err) = write_features(paths, &assigned.features).await {
            warn!(err = %format!("{err:#}"), "failed to persist generated feature ids");
        }
    }
    debug!(count = assigned.features.len(), "features loaded");
    assigned.features
}

async fn read_records(paths: &FactoryPaths) -> Result<Option<Vec<FeatureRecord>>> {
    let path = &paths.feature_list_path;
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let records = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(records))
}

/// Rewrite the feature list (pretty JSON, trailing newline, atomic replace).
pub async fn write_features(paths: &FactoryPaths, features: &[Feature]) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(features).context("serialize features")?;
    buf.push('\n');
    write_atomic_async(&paths.feature_list_path, &buf).await
}

/// Load the feature list and return the feature with `id`.
pub async fn find_feature(paths: &FactoryPaths, id: &str) -> Result<Feature> {
    let features = load_features(paths).await;
    find_in(&features, id)
        .cloned()
        .ok_or_else(|| {
            FeatureNotFoundError {
                feature_id: id.to_string(),
            }
            .into()
        })
}

/// Freshly reloaded status of `id`, or `None` if the feature is gone.
pub async fn current_status(paths: &FactoryPaths, id: &str) -> Option<FeatureStatus> {
    let features = load_features(paths).await;
    find_in(&features, id).map(|feature| feature.status)
}

/// Set the status of one feature and rewrite the list.
///
/// Moving to `verified` also deletes the feature's execution log.
#[instrument(skip(paths))]
pub async fn update_feature_status(
    paths: &FactoryPaths,
    id: &str,
    status: FeatureStatus,
) -> Result<Feature> {
    let mut features = load_features(paths).await;
    let feature = features
        .iter_mut()
        .find(|feature| feature.id == id)
        .ok_or_else(|| FeatureNotFoundError {
            feature_id: id.to_string(),
        })?;
    let previous = feature.status;
    feature.status = status;
    let updated = feature.clone();

    write_features(paths, &features)
        .await
        .with_context(|| format!("update status of feature '{id}'"))?;
    info!(from = %previous, to = %status, "feature status updated");

    if status == FeatureStatus::Verified {
        execution_log::delete(paths, id).await;
    }
    Ok(updated)
}
