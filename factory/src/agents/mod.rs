//! The delegate boundary and the tools the engine exposes to it.

pub mod claude;
pub mod provider;
pub mod status_tool;
