//! Test-only helpers: temp projects, a scripted delegate, and an event recorder.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::agents::provider::{AgentProvider, MessageStream, ProviderMessage, QueryRequest};
use crate::agents::status_tool::STATUS_TOOL_NAME;
use crate::engine::Engine;
use crate::error::AbortedError;
use crate::events::{EventSink, FactoryEvent};
use crate::feature::{Feature, FeatureStatus};
use crate::io::config::{FactoryConfig, LoopConfig};
use crate::io::init::{FactoryPaths, InitOptions, init_factory};

/// Create a deterministic feature with one step.
pub fn feature(id: &str, status: FeatureStatus) -> Feature {
    Feature {
        id: id.to_string(),
        category: "test".to_string(),
        description: format!("{id} description"),
        steps: vec![format!("{id} step")],
        status,
    }
}

/// Config with millisecond loop delays so loop tests finish quickly.
pub fn fast_config() -> FactoryConfig {
    FactoryConfig {
        auto_loop: LoopConfig {
            delay_ms: 5,
            busy_delay_ms: 5,
            error_delay_ms: 5,
        },
        ..FactoryConfig::default()
    }
}

/// A project directory with an initialized `.factory/`, removed on drop.
pub struct TestProject {
    _temp: TempDir,
    paths: FactoryPaths,
}

impl TestProject {
    /// Empty feature list, default config.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = init_factory(temp.path(), &InitOptions { force: false })?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn with_features(features: Vec<Feature>) -> Result<Self> {
        let project = Self::new()?;
        project.write_features(&features)?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &FactoryPaths {
        &self.paths
    }

    pub fn write_features(&self, features: &[Feature]) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(features)?;
        buf.push('\n');
        fs::write(&self.paths.feature_list_path, buf)
            .with_context(|| format!("write {}", self.paths.feature_list_path.display()))
    }

    pub fn read_features(&self) -> Result<Vec<Feature>> {
        let raw = fs::read_to_string(&self.paths.feature_list_path)
            .with_context(|| format!("read {}", self.paths.feature_list_path.display()))?;
        serde_json::from_str(&raw).context("parse feature list")
    }

    pub fn status_of(&self, id: &str) -> Result<FeatureStatus> {
        self.read_features()?
            .into_iter()
            .find(|feature| feature.id == id)
            .map(|feature| feature.status)
            .ok_or_else(|| anyhow!("feature '{id}' not in list"))
    }

    /// Engine over this project with [`fast_config`].
    pub fn engine(&self, provider: Arc<ScriptedProvider>, sink: Arc<RecordingSink>) -> Engine {
        Engine::new(self.root(), fast_config(), provider, sink)
    }
}

/// One step of a scripted delegate turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    ToolUse { name: String, input: Value },
    /// Call the status-update tool for the feature under execution.
    SetStatus(FeatureStatus),
    /// Block until the request is cancelled, then end with an abort.
    Hang,
    /// End the stream with an error.
    Fail(String),
}

impl ScriptStep {
    pub fn text(text: &str) -> Self {
        ScriptStep::Text(text.to_string())
    }
}

/// Delegate that replays scripted turns, one per `execute_query` call.
///
/// Once the scripted turns are used up every further call plays the default
/// turn (empty unless set with [`ScriptedProvider::with_default_turn`]).
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
    default_turn: Vec<ScriptStep>,
    requests: Mutex<Vec<QueryRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    pub fn with_default_turn(mut self, steps: Vec<ScriptStep>) -> Self {
        self.default_turn = steps;
        self
    }

    /// Number of delegate calls made so far.
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AgentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute_query(&self, request: QueryRequest) -> MessageStream {
        let steps = lock(&self.turns)
            .pop_front()
            .unwrap_or_else(|| self.default_turn.clone());
        lock(&self.requests).push(request.clone());

        Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Text(text) => {
                        yield Ok(ProviderMessage::Text(text));
                    }
                    ScriptStep::ToolUse { name, input } => {
                        yield Ok(ProviderMessage::ToolUse { name, input });
                    }
                    ScriptStep::SetStatus(status) => {
                        let input = json!({
                            "featureId": request.status_tool.feature_id(),
                            "status": status.as_str(),
                        });
                        yield Ok(ProviderMessage::ToolUse {
                            name: STATUS_TOOL_NAME.to_string(),
                            input: input.clone(),
                        });
                        if let Err(err) = request.status_tool.call(&input).await {
                            yield Err(err);
                            return;
                        }
                    }
                    ScriptStep::Hang => {
                        request.cancel.cancelled().await;
                        yield Err(anyhow::Error::new(AbortedError));
                        return;
                    }
                    ScriptStep::Fail(message) => {
                        yield Err(anyhow!(message));
                        return;
                    }
                }
            }
        })
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FactoryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FactoryEvent> {
        lock(&self.events).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                FactoryEvent::Error { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: FactoryEvent) {
        lock(&self.events).push(event);
    }
}

/// Poll `condition` until it holds or `timeout` elapses. Returns the last result.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
