use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Persisted status of a feature. The only field the engine ever rewrites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Backlog,
    InProgress,
    Verified,
}

impl FeatureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureStatus::Backlog => "backlog",
            FeatureStatus::InProgress => "in_progress",
            FeatureStatus::Verified => "verified",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(FeatureStatus::Backlog),
            "in_progress" => Ok(FeatureStatus::InProgress),
            "verified" => Ok(FeatureStatus::Verified),
            other => Err(anyhow!(
                "invalid status '{other}' (expected backlog, in_progress or verified)"
            )),
        }
    }
}

/// A unit of work from `.factory/feature_list.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feature {
    pub id: String,
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    pub status: FeatureStatus,
}

/// On-disk shape of a feature before ids are assigned.
///
/// Every field is optional so hand-authored lists load; unknown fields a
/// delegate may have attached are ignored and disappear on the next rewrite.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureRecord {
    pub id: Option<String>,
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    #[serde(deserialize_with = "lenient_status")]
    pub status: FeatureStatus,
}

impl FeatureRecord {
    pub fn into_feature(self, id: String) -> Feature {
        Feature {
            id,
            category: self.category,
            description: self.description,
            steps: self.steps,
            status: self.status,
        }
    }
}

fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FeatureStatus, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        None => FeatureStatus::Backlog,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(status = value, "unknown feature status, treating as backlog");
            FeatureStatus::Backlog
        }),
    })
}
