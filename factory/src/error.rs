//! Typed errors callers branch on.
//!
//! Everything else travels as `anyhow::Error`; these are recovered with
//! `downcast_ref` where the caller needs to tell them apart.

use thiserror::Error;

/// A second execution was requested for a feature id that is already registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feature '{feature_id}' is already running")]
pub struct AlreadyRunningError {
    pub feature_id: String,
}

/// `start_loop` was called while the autonomous loop is running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("auto loop is already running")]
pub struct LoopAlreadyRunningError;

/// The requested feature id is not in the feature list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feature '{feature_id}' not found")]
pub struct FeatureNotFoundError {
    pub feature_id: String,
}

/// Raised inside a provider stream when its cancellation token fired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delegate stream aborted")]
pub struct AbortedError;

/// Returns true if `err` (or anything in its chain) is an [`AbortedError`].
pub fn is_aborted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<AbortedError>())
}
