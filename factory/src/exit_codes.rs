//! Stable exit codes for factory CLI commands.

/// Command succeeded, or the feature run passed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, unknown feature id, or other errors.
pub const INVALID: i32 = 1;
/// `factory run|verify|resume` finished without the feature reaching `verified`.
pub const NOT_PASSED: i32 = 2;
/// The feature (or the loop) is already running.
pub const ALREADY_RUNNING: i32 = 3;
