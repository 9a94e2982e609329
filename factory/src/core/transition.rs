//! Status resolution after a state-machine pass.

use crate::core::types::{ExecutionMode, RunResult};
use crate::feature::FeatureStatus;

/// Status to persist once an execution finishes.
///
/// `current` is the status freshly reloaded after the run.
///
/// | mode      | passes | result        |
/// |-----------|--------|---------------|
/// | any       | yes    | `verified`    |
/// | implement | no     | `backlog`     |
/// | verify    | no     | `in_progress` |
/// | resume    | no     | `current`     |
pub fn status_after_run(mode: ExecutionMode, passes: bool, current: FeatureStatus) -> FeatureStatus {
    if passes {
        return FeatureStatus::Verified;
    }
    match mode {
        ExecutionMode::Implement => FeatureStatus::Backlog,
        ExecutionMode::Verify => FeatureStatus::InProgress,
        ExecutionMode::Resume => current,
    }
}

/// Decision taken by the resume supervisor after each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// The feature reached `verified`.
    Passed,
    /// Run another action pass with the grown log as context.
    Retry,
    /// Retries exhausted while the feature is still `in_progress`.
    Exhausted,
    /// The feature left `in_progress` without passing (e.g. the delegate set it
    /// back to `backlog`), or the run was cancelled.
    Stopped,
}

/// Decide what the supervisor does after a resume pass.
///
/// `retries_done` counts retries already performed (0 after the first pass).
pub fn resume_decision(
    result: &RunResult,
    current: FeatureStatus,
    retries_done: u32,
    max_retries: u32,
) -> ResumeDecision {
    if result.passes {
        return ResumeDecision::Passed;
    }
    if result.aborted || current != FeatureStatus::InProgress {
        return ResumeDecision::Stopped;
    }
    if retries_done >= max_retries {
        return ResumeDecision::Exhausted;
    }
    ResumeDecision::Retry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(passes: bool) -> RunResult {
        RunResult {
            passes,
            message: String::new(),
            aborted: false,
        }
    }

    #[test]
    fn passing_always_verifies() {
        for mode in [
            ExecutionMode::Implement,
            ExecutionMode::Verify,
            ExecutionMode::Resume,
        ] {
            assert_eq!(
                status_after_run(mode, true, FeatureStatus::InProgress),
                FeatureStatus::Verified
            );
        }
    }

    #[test]
    fn failed_implementation_regresses_to_backlog() {
        assert_eq!(
            status_after_run(ExecutionMode::Implement, false, FeatureStatus::InProgress),
            FeatureStatus::Backlog
        );
    }

    #[test]
    fn failed_verification_stays_in_progress() {
        assert_eq!(
            status_after_run(ExecutionMode::Verify, false, FeatureStatus::InProgress),
            FeatureStatus::InProgress
        );
    }

    #[test]
    fn failed_resume_keeps_what_the_delegate_left() {
        assert_eq!(
            status_after_run(ExecutionMode::Resume, false, FeatureStatus::Backlog),
            FeatureStatus::Backlog
        );
    }

    #[test]
    fn resume_retries_only_while_in_progress() {
        assert_eq!(
            resume_decision(&result(false), FeatureStatus::InProgress, 0, 3),
            ResumeDecision::Retry
        );
        assert_eq!(
            resume_decision(&result(false), FeatureStatus::InProgress, 3, 3),
            ResumeDecision::Exhausted
        );
        assert_eq!(
            resume_decision(&result(false), FeatureStatus::Backlog, 0, 3),
            ResumeDecision::Stopped
        );
        assert_eq!(
            resume_decision(&result(true), FeatureStatus::Verified, 0, 3),
            ResumeDecision::Passed
        );
    }

    #[test]
    fn aborted_resume_is_not_retried() {
        let aborted = RunResult::aborted(ExecutionMode::Resume);
        assert_eq!(
            resume_decision(&aborted, FeatureStatus::InProgress, 0, 3),
            ResumeDecision::Stopped
        );
    }
}
