//! Core services for the thenvoi CLI.
//!
//! - [`credentials`]: the YAML credential store and its environment overrides.
//! - [`process`]: PID-file registry and supervisor for long-running agents.
//! - [`adapter`]: catalog of agent-framework adapters and their parameters.
//! - [`link`]: interface to the platform link plus the subprocess bridge.

pub mod adapter;
pub mod credentials;
pub mod link;
pub mod process;
