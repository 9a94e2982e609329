//! System and task prompts for the delegate agent.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::ExecutionMode;
use crate::feature::Feature;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Everything a prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub feature: &'a Feature,
    pub mode: ExecutionMode,
    /// Execution log contents carried into a resumed run.
    pub prior_context: Option<&'a str>,
    /// Name of the status-update tool offered to the delegate.
    pub status_tool: &'a str,
    /// Shell fallback for delegates that only have a shell.
    pub status_command: &'a str,
}

/// Rendered prompt pair for one delegate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    /// Role-specific system prompt.
    pub system: String,
    /// Per-feature task prompt.
    pub task: String,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)?;
        env.add_template("task", TASK_TEMPLATE)?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, input: &PromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            mode => input.mode.as_str(),
            feature => input.feature,
            prior_context => input.prior_context.map(str::trim).filter(|s| !s.is_empty()),
            status_tool => input.status_tool,
            status_command => input.status_command,
        })?;
        Ok(rendered)
    }
}

/// Render the system and task prompts for one delegate call.
pub fn build_prompts(input: &PromptInputs<'_>) -> Result<Prompts> {
    let engine = PromptEngine::new()?;
    Ok(Prompts {
        system: engine.render("system", input)?,
        task: engine.render("task", input)?,
    })
}
