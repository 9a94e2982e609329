//! The per-feature state machine: planning, action, verification.
//!
//! One pass makes exactly one streaming delegate call. Whether the feature
//! passed is decided afterwards from the feature list alone: the delegate has
//! to move the feature to `verified` through the status-update tool, what it
//! says in its output text does not count.

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::agents::provider::{AgentProvider, CancelToken, MessageStream, ProviderMessage, QueryRequest};
use crate::agents::status_tool::{STATUS_TOOL_NAME, StatusUpdateTool};
use crate::core::types::{ExecutionMode, Phase, RunResult, preview};
use crate::error::is_aborted;
use crate::events::{EventSink, FactoryEvent};
use crate::feature::{Feature, FeatureStatus};
use crate::io::config::FactoryConfig;
use crate::io::execution_log;
use crate::io::feature_store::current_status;
use crate::io::init::FactoryPaths;
use crate::io::prompt::{PromptInputs, build_prompts};
use crate::registry::ExecutionClaim;

/// Borrowed view of everything a pass needs.
pub struct FeatureMachine<'a> {
    pub paths: &'a FactoryPaths,
    pub config: &'a FactoryConfig,
    pub provider: &'a dyn AgentProvider,
    pub sink: &'a dyn EventSink,
}

enum ActionOutcome {
    /// The stream ended (or the execution was unregistered); carries the accumulated text.
    Finished(String),
    Aborted,
}

impl FeatureMachine<'_> {
    /// Run one planning/action/verification pass for `feature`.
    ///
    /// A cancelled delegate call is a normal non-passing result. Any other
    /// delegate or prompt error is returned; the caller owns registry cleanup
    /// and the error notification.
    #[instrument(skip_all, fields(feature_id = %feature.id, mode = %mode))]
    pub async fn run(
        &self,
        claim: &ExecutionClaim,
        feature: &Feature,
        mode: ExecutionMode,
        prior_context: Option<&str>,
    ) -> Result<RunResult> {
        self.enter(claim, Phase::Planning, format!("Planning {} of {}", mode, feature.id));

        self.enter(claim, Phase::Action, format!("Delegating {} of {}", mode, feature.id));
        let text = match self.action(claim, feature, mode, prior_context).await? {
            ActionOutcome::Finished(text) => text,
            ActionOutcome::Aborted => {
                info!("delegate call aborted");
                return Ok(RunResult::aborted(mode));
            }
        };

        self.enter(
            claim,
            Phase::Verification,
            format!("Checking status of {}", feature.id),
        );
        let status = current_status(self.paths, &feature.id).await;
        let passes = status == Some(FeatureStatus::Verified);
        info!(passes, status = ?status, "verification finished");
        Ok(RunResult {
            passes,
            message: preview(&text, self.config.message_preview_chars),
            aborted: false,
        })
    }

    fn enter(&self, claim: &ExecutionClaim, phase: Phase, message: String) {
        debug!(%phase, "entering phase");
        claim.set_phase(phase);
        self.sink.emit(FactoryEvent::Phase {
            feature_id: claim.feature_id().to_string(),
            phase,
            message,
        });
    }

    async fn action(
        &self,
        claim: &ExecutionClaim,
        feature: &Feature,
        mode: ExecutionMode,
        prior_context: Option<&str>,
    ) -> Result<ActionOutcome> {
        let tool = StatusUpdateTool::new(self.paths.clone(), feature.id.clone());
        let status_command = tool.shell_command();
        let prompts = build_prompts(&PromptInputs {
            feature,
            mode,
            prior_context,
            status_tool: STATUS_TOOL_NAME,
            status_command: &status_command,
        })
        .context("render prompts")?;

        let mut allowed_tools = self.config.agent.allowed_tools.clone();
        allowed_tools.push(STATUS_TOOL_NAME.to_string());

        let cancel = CancelToken::new();
        if !claim.attach_cancel(cancel.clone()) {
            info!("execution was stopped before the delegate call started");
            return Ok(ActionOutcome::Aborted);
        }
        let request = QueryRequest {
            prompt: prompts.task,
            system_prompt: prompts.system,
            model: self.config.agent.model.clone(),
            cwd: self.paths.root.clone(),
            max_turns: self.config.agent.max_turns,
            allowed_tools,
            cancel: cancel.clone(),
            status_tool: tool,
        };
        info!(provider = self.provider.name(), "starting delegate call");
        let stream = self.provider.execute_query(request);
        let outcome = self.consume(claim, stream, &cancel).await;
        claim.detach_cancel();
        outcome
    }

    async fn consume(
        &self,
        claim: &ExecutionClaim,
        mut stream: MessageStream,
        cancel: &CancelToken,
    ) -> Result<ActionOutcome> {
        let feature_id = claim.feature_id();
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ActionOutcome::Aborted),
                next = stream.next() => next,
            };
            let Some(message) = next else {
                break;
            };
            if !claim.is_active() {
                info!("execution removed from registry, ending stream early");
                break;
            }
            match message {
                Ok(ProviderMessage::Text(chunk)) => {
                    self.log(feature_id, &chunk).await;
                    text.push_str(&chunk);
                    self.sink.emit(FactoryEvent::Progress {
                        feature_id: feature_id.to_string(),
                        content: chunk,
                    });
                }
                Ok(ProviderMessage::ToolUse { name, input }) => {
                    self.log(feature_id, &format!("\n[tool: {name}] {input}\n"))
                        .await;
                    self.sink.emit(FactoryEvent::ToolUse {
                        feature_id: feature_id.to_string(),
                        tool: name,
                        input,
                    });
                }
                Ok(ProviderMessage::Other { kind }) => trace!(%kind, "skipping provider message"),
                Err(err) if is_aborted(&err) => return Ok(ActionOutcome::Aborted),
                Err(err) => {
                    error!(err = %format!("{err:#}"), "delegate stream failed");
                    return Err(err.context(format!("delegate call for feature '{feature_id}'")));
                }
            }
        }
        Ok(ActionOutcome::Finished(text))
    }

    async fn log(&self, feature_id: &str, text: &str) {
        if let Err(err) = execution_log::append(self.paths, feature_id, text).await {
            warn!(err = %format!("{err:#}"), "failed to append to execution log");
        }
    }
}
