//! The status-update side channel offered to the delegate.
//!
//! The delegate never writes the feature list itself; it asks for a status
//! change through this tool, which goes through the same store update the
//! engine uses. A tool instance is bound to the feature under execution, so
//! the registry claim on that id covers every write it makes.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::feature::FeatureStatus;
use crate::io::feature_store::update_feature_status;
use crate::io::init::FactoryPaths;

/// Tool name the delegate sees.
pub const STATUS_TOOL_NAME: &str = "UpdateFeatureStatus";

const STATUS_UPDATE_SCHEMA: &str = include_str!("../../schemas/status_update.schema.json");

/// Validated tool input: exactly `{featureId, status}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatusUpdateInput {
    pub feature_id: String,
    pub status: FeatureStatus,
}

#[derive(Debug, Clone)]
pub struct StatusUpdateTool {
    paths: FactoryPaths,
    feature_id: String,
}

impl StatusUpdateTool {
    pub fn new(paths: FactoryPaths, feature_id: impl Into<String>) -> Self {
        Self {
            paths,
            feature_id: feature_id.into(),
        }
    }

    pub fn feature_id(&self) -> &str {
        &self.feature_id
    }

    /// Shell equivalent of the tool, for delegates that can only run commands.
    pub fn shell_command(&self) -> String {
        format!(
            "factory --project {} update-status {} <backlog|in_progress|verified>",
            shell_quote(&self.paths.root.display().to_string()),
            shell_quote(&self.feature_id),
        )
    }

    /// Apply a tool call. Returns the text handed back to the delegate.
    pub async fn call(&self, input: &Value) -> Result<String> {
        let request = parse_input(input)?;
        if request.feature_id != self.feature_id {
            bail!(
                "this session may only update feature '{}', not '{}'",
                self.feature_id,
                request.feature_id
            );
        }
        let feature = update_feature_status(&self.paths, &request.feature_id, request.status)
            .await
            .context("apply status update")?;
        info!(feature_id = %feature.id, status = %feature.status, "delegate updated status");
        Ok(format!(
            "Feature {} status set to {}",
            feature.id, feature.status
        ))
    }
}

fn schema() -> Result<Value> {
    serde_json::from_str(STATUS_UPDATE_SCHEMA).context("parse status update schema")
}

/// Validate `input` against the tool schema and deserialize it.
pub fn parse_input(input: &Value) -> Result<StatusUpdateInput> {
    let schema = schema()?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(input) {
        let messages = compiled
            .iter_errors(input)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        bail!("invalid status update: {}", messages.join("; "));
    }
    serde_json::from_value(input.clone()).context("deserialize status update")
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
