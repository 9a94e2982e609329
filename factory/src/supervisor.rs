//! Bounded retry of resumed executions.
//!
//! A resume pass that ends with the feature still `in_progress` is re-run with
//! the execution log (now including the failed pass) as context, up to
//! `resume.max_retries` more times.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::transition::{ResumeDecision, resume_decision};
use crate::core::types::{ExecutionMode, RunResult};
use crate::feature::{Feature, FeatureStatus};
use crate::io::execution_log;
use crate::io::feature_store::current_status;
use crate::machine::FeatureMachine;
use crate::registry::ExecutionClaim;

/// Result of a supervised resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeOutcome {
    /// Result of the last pass.
    pub result: RunResult,
    /// Passes run, including the first one.
    pub attempts: u32,
    pub decision: ResumeDecision,
}

/// Text appended to the execution log before retry `attempt` of `max`.
pub fn retry_marker(attempt: u32, max: u32) -> String {
    format!("\n\n--- retry attempt {attempt} of {max} ---\n\n")
}

/// Resume `feature` from its execution log, retrying while it stays `in_progress`.
#[instrument(skip_all, fields(feature_id = %feature.id, max_retries = max_retries))]
pub async fn resume(
    machine: &FeatureMachine<'_>,
    claim: &ExecutionClaim,
    feature: &Feature,
    max_retries: u32,
) -> Result<ResumeOutcome> {
    let mut retries_done = 0;
    loop {
        let context = execution_log::read(machine.paths, &feature.id).await;
        let result = machine
            .run(claim, feature, ExecutionMode::Resume, context.as_deref())
            .await?;
        let current = current_status(machine.paths, &feature.id)
            .await
            .unwrap_or(FeatureStatus::Backlog);
        let decision = resume_decision(&result, current, retries_done, max_retries);
        info!(?decision, %current, retries_done, "resume pass finished");

        if decision != ResumeDecision::Retry {
            return Ok(ResumeOutcome {
                result,
                attempts: retries_done + 1,
                decision,
            });
        }
        retries_done += 1;
        let marker = retry_marker(retries_done, max_retries);
        if let Err(err) = execution_log::append(machine.paths, &feature.id, &marker).await {
            warn!(err = %format!("{err:#}"), "failed to write retry marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::FactoryConfig;
    use crate::registry::{ExecutionMeta, ExecutionRegistry};
    use crate::test_support::{RecordingSink, ScriptStep, ScriptedProvider, TestProject, feature};

    async fn supervise(
        project: &TestProject,
        provider: &ScriptedProvider,
        max_retries: u32,
    ) -> ResumeOutcome {
        let config = FactoryConfig::default();
        let sink = RecordingSink::new();
        let registry = ExecutionRegistry::new();
        let machine = FeatureMachine {
            paths: project.paths(),
            config: &config,
            provider,
            sink: &sink,
        };
        let claim = registry
            .register(
                "f1",
                ExecutionMeta {
                    project_path: project.root().to_path_buf(),
                    mode: ExecutionMode::Resume,
                },
            )
            .expect("register");
        let feature = feature("f1", FeatureStatus::InProgress);
        resume(&machine, &claim, &feature, max_retries)
            .await
            .expect("resume")
    }

    #[tokio::test]
    async fn stalled_feature_is_retried_up_to_the_bound() {
        let project =
            TestProject::with_features(vec![feature("f1", FeatureStatus::InProgress)]).expect("project");
        let provider = ScriptedProvider::default().with_default_turn(vec![ScriptStep::text("still going")]);

        let outcome = supervise(&project, &provider, 3).await;
        assert_eq!(provider.calls(), 4);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.decision, ResumeDecision::Exhausted);
        assert!(!outcome.result.passes);

        let log = execution_log::read(project.paths(), "f1").await.expect("log");
        assert!(log.contains(&retry_marker(1, 3)));
        assert!(log.contains(&retry_marker(3, 3)));
    }

    #[tokio::test]
    async fn retries_carry_the_grown_log_as_context() {
        let project =
            TestProject::with_features(vec![feature("f1", FeatureStatus::InProgress)]).expect("project");
        execution_log::append(project.paths(), "f1", "earlier session")
            .await
            .expect("seed log");
        let provider = ScriptedProvider::new(vec![
            vec![ScriptStep::text("first pass")],
            vec![ScriptStep::SetStatus(FeatureStatus::Verified)],
        ]);

        let outcome = supervise(&project, &provider, 3).await;
        assert_eq!(outcome.decision, ResumeDecision::Passed);
        assert_eq!(outcome.attempts, 2);

        let requests = provider.requests();
        assert!(requests[0].prompt.contains("earlier session"));
        assert!(requests[1].prompt.contains("first pass"));
        assert!(requests[1].prompt.contains("retry attempt 1 of 3"));
    }

    #[tokio::test]
    async fn leaving_in_progress_stops_retrying() {
        let project =
            TestProject::with_features(vec![feature("f1", FeatureStatus::InProgress)]).expect("project");
        let provider = ScriptedProvider::new(vec![vec![ScriptStep::SetStatus(FeatureStatus::Backlog)]]);

        let outcome = supervise(&project, &provider, 3).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.decision, ResumeDecision::Stopped);
    }
}
