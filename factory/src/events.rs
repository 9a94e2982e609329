//! Lifecycle events delivered to observers.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::types::{ExecutionMode, Phase};
use crate::feature::Feature;

/// Events emitted by the engine. Serialized with a `type` tag and camelCase
/// fields (`featureId`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FactoryEvent {
    FeatureStart {
        feature_id: String,
        mode: ExecutionMode,
        feature: Feature,
    },
    Phase {
        feature_id: String,
        phase: Phase,
        message: String,
    },
    /// A fragment of delegate text.
    Progress { feature_id: String, content: String },
    ToolUse {
        feature_id: String,
        tool: String,
        input: Value,
    },
    FeatureComplete {
        feature_id: String,
        passes: bool,
        message: String,
    },
    /// The auto loop found nothing left to do.
    LoopComplete { message: String },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        feature_id: Option<String>,
    },
}

impl FactoryEvent {
    pub fn error(error: impl Into<String>, feature_id: Option<&str>) -> Self {
        FactoryEvent::Error {
            error: error.into(),
            feature_id: feature_id.map(str::to_string),
        }
    }
}

/// Observer of lifecycle events. Must not block: it is called inline from the
/// execution that produced the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FactoryEvent);
}

/// Fans events out to any number of subscribers.
///
/// Slow subscribers lag and lose events; the engine never waits on them.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: Arc<broadcast::Sender<FactoryEvent>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FactoryEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: FactoryEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// One-line human rendering used by the CLI. Progress text is passed through
/// unchanged so streamed fragments join up.
pub fn render(event: &FactoryEvent) -> String {
    match event {
        FactoryEvent::FeatureStart {
            feature_id,
            mode,
            feature,
        } => format!("\n[{feature_id}] {mode}: {}\n", feature.description),
        FactoryEvent::Phase {
            feature_id,
            phase,
            message,
        } => format!("\n[{feature_id}] {phase}: {message}\n"),
        FactoryEvent::Progress { content, .. } => content.clone(),
        FactoryEvent::ToolUse {
            feature_id, tool, ..
        } => format!("\n[{feature_id}] tool: {tool}\n"),
        FactoryEvent::FeatureComplete {
            feature_id,
            passes,
            ..
        } => {
            let verdict = if *passes { "verified" } else { "not verified" };
            format!("\n[{feature_id}] complete: {verdict}\n")
        }
        FactoryEvent::LoopComplete { message } => format!("\n[loop] {message}\n"),
        FactoryEvent::Error { error, feature_id } => match feature_id {
            Some(id) => format!("\n[{id}] error: {error}\n"),
            None => format!("\n[factory] error: {error}\n"),
        },
    }
}
