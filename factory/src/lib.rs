//! Feature factory orchestration engine.
//!
//! A persisted backlog of features is driven through a pick → implement →
//! verify → mark-done cycle, with the actual work delegated to an external
//! agent. The crate is split by side effects:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, id assignment, status
//!   transitions). No I/O.
//! - **[`io`]**: Side-effecting operations (feature list, execution logs,
//!   config, prompt rendering).
//! - **[`agents`]**: The delegate boundary ([`agents::provider::AgentProvider`])
//!   and the status-update side channel exposed to the delegate.
//!
//! Orchestration modules ([`registry`], [`machine`], [`supervisor`],
//! [`looping`]) are wired together by [`engine::Engine`], the per-project
//! context object every entry point goes through.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod feature;
pub mod io;
pub mod logging;
pub mod looping;
pub mod machine;
pub mod registry;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
