//! Factory configuration stored under `.factory/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;

/// Factory configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FactoryConfig {
    /// Characters of delegate output kept in a run's result message.
    pub message_preview_chars: usize,

    pub agent: AgentConfig,

    pub resume: ResumeConfig,

    #[serde(rename = "loop")]
    pub auto_loop: LoopConfig,
}

/// How the delegate agent is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable for the CLI provider (e.g. `claude`).
    pub command: String,
    /// Model name passed through to the provider.
    pub model: String,
    /// Turn budget per delegate call. The only bound on a single run's length.
    pub max_turns: u32,
    /// Tools the delegate may use, in addition to the status-update tool.
    pub allowed_tools: Vec<String>,
    /// Extra arguments appended to the provider command line.
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResumeConfig {
    /// Additional attempts after the first resume pass while the feature stays `in_progress`.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause after each completed feature.
    pub delay_ms: u64,
    /// Pause when the selected feature is already claimed by a direct run.
    pub busy_delay_ms: u64,
    /// Pause after an iteration failed.
    pub error_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            model: "sonnet".to_string(),
            max_turns: 1000,
            allowed_tools: ["Read", "Write", "Edit", "Glob", "Grep", "Bash", "WebSearch", "WebFetch"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3000,
            busy_delay_ms: 3000,
            error_delay_ms: 5000,
        }
    }
}

impl LoopConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn busy_delay(&self) -> Duration {
        Duration::from_millis(self.busy_delay_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            message_preview_chars: 500,
            agent: AgentConfig::default(),
            resume: ResumeConfig::default(),
            auto_loop: LoopConfig::default(),
        }
    }
}

impl FactoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.message_preview_chars == 0 {
            return Err(anyhow!("message_preview_chars must be > 0"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must be non-empty"));
        }
        if self.agent.model.trim().is_empty() {
            return Err(anyhow!("agent.model must be non-empty"));
        }
        if self.agent.max_turns == 0 {
            return Err(anyhow!("agent.max_turns must be > 0"));
        }
        if self.agent.allowed_tools.iter().any(|tool| tool.trim().is_empty()) {
            return Err(anyhow!("agent.allowed_tools must not contain empty names"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FactoryConfig::default()`.
pub fn load_config(path: &Path) -> Result<FactoryConfig> {
    if !path.exists() {
        let cfg = FactoryConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FactoryConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FactoryConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
