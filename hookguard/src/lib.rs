//! The `hookguard` Claude Code hook: settings loading, the hook wire
//! protocol, audit logging and the CLI commands built on `hookguard_core`.

pub mod audit;
pub mod cli;
pub mod cmd;
pub mod hooks;
pub mod settings;
pub mod tracing_init;
pub mod version;
