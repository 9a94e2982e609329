//! I/O helpers for the orchestration engine.

pub mod atomic;
pub mod config;
pub mod execution_log;
pub mod feature_store;
pub mod init;
pub mod prompt;
