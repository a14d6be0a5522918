//! Offline caching agent for a web application.
//!
//! The agent installs a versioned cache generation from a manifest, removes
//! stale generations when it activates, and answers requests network-first,
//! falling back to the cache and finally to synthesized offline responses.

pub mod agent;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod lifecycle;
pub mod logging;

pub use agent::{ActivateReport, AgentConfig, AgentError, OfflineCacheAgent};
pub use config::Config;
pub use lifecycle::{Host, HostError, InstallOutcome};
