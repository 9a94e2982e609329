//! Shared deterministic types for the engine's core logic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which entry point an execution came through.
///
/// Drives the system prompt role, the task prompt, and the status resolution
/// after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Implement a feature from scratch (direct run or the auto loop).
    Implement,
    /// Check an implemented feature and mark it verified if it holds up.
    Verify,
    /// Continue from the feature's execution log.
    Resume,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Implement => "implement",
            ExecutionMode::Verify => "verify",
            ExecutionMode::Resume => "resume",
        }
    }

    /// Label used in the `"<label> aborted"` message of a cancelled run.
    pub fn abort_label(self) -> &'static str {
        match self {
            ExecutionMode::Implement => "Implementation",
            ExecutionMode::Verify => "Verification",
            ExecutionMode::Resume => "Resume",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of the feature state machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Action,
    Verification,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Action => "action",
            Phase::Verification => "verification",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one state-machine pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// True iff the feature list shows `verified` after the action phase.
    pub passes: bool,
    /// Leading characters of the delegate's accumulated text, or the abort message.
    pub message: String,
    /// The delegate stream was cancelled before it finished.
    pub aborted: bool,
}

impl RunResult {
    pub fn aborted(mode: ExecutionMode) -> Self {
        Self {
            passes: false,
            message: format!("{} aborted", mode.abort_label()),
            aborted: true,
        }
    }
}

/// Take at most `max_chars` characters from `text` (char-boundary safe).
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
