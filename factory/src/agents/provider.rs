//! Abstract boundary to the delegate agent.
//!
//! The [`AgentProvider`] trait decouples the feature state machine from the
//! actual agent backend (currently the `claude` CLI). Tests use scripted
//! providers that yield predetermined messages without spawning processes.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::watch;

use super::status_tool::StatusUpdateTool;

/// One event from a delegate stream.
///
/// The engine reads `Text` and `ToolUse`; everything else a provider sees is
/// folded into `Other` and ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    /// A fragment of assistant text.
    Text(String),
    /// The delegate invoked a tool.
    ToolUse { name: String, input: Value },
    /// Provider-specific envelope (system/init/result/...).
    Other { kind: String },
}

/// Lazily consumed delegate stream. Ends when the delegate stops.
///
/// A cancelled stream yields an [`crate::error::AbortedError`].
pub type MessageStream = BoxStream<'static, anyhow::Result<ProviderMessage>>;

/// Parameters for one delegate call.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Task prompt.
    pub prompt: String,
    /// Role-specific system prompt.
    pub system_prompt: String,
    pub model: String,
    /// Working directory the delegate operates in.
    pub cwd: PathBuf,
    pub max_turns: u32,
    /// Tool allowlist, including the status-update tool name.
    pub allowed_tools: Vec<String>,
    /// Fires when the execution is cancelled.
    pub cancel: CancelToken,
    /// The sanctioned way for the delegate to change the feature's status.
    /// In-process providers call it directly; CLI delegates get its
    /// [`StatusUpdateTool::shell_command`] through the task prompt instead.
    pub status_tool: StatusUpdateTool,
}

/// Abstraction over delegate agent backends.
pub trait AgentProvider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Start a delegate call. Nothing runs until the stream is polled.
    fn execute_query(&self, request: QueryRequest) -> MessageStream;
}

/// Cooperative cancellation signal shared between the registry and a
/// running delegate call. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
