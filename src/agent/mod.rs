//! The offline caching agent.
//!
//! `OfflineCacheAgent` owns one cache generation and reacts to the three
//! lifecycle signals of its host:
//!
//! - `on_install` fills the generation from the manifest (offline document
//!   first, then the rest as one all-or-nothing batch) and asks to skip waiting
//! - `on_activate` deletes every other generation and claims open clients
//! - `on_fetch` answers each request network-first, falling back to the cache
//!
//! The handlers are plain async methods so they can be driven by the
//! `lifecycle::Host` or called directly.

mod activate;
mod error;
mod fetch;
mod install;

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::warn;
use url::Url;

use crate::cache::CacheStorage;
use crate::fetch::Network;

pub use activate::ActivateReport;
pub use error::AgentError;

/// Settings the agent runs with, URLs already resolved against the origin.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  /// Name of the cache generation this agent owns
  pub generation: String,
  /// Fallback document served to navigations while offline
  pub offline_url: Url,
  /// URLs cached at install time; includes `offline_url`
  pub manifest: Vec<Url>,
  /// Ask the host to activate right after install instead of waiting for
  /// pages of the previous generation to close
  pub skip_waiting: bool,
}

pub struct OfflineCacheAgent {
  config: AgentConfig,
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  /// Background cache writes started by `on_fetch`
  pending: Mutex<JoinSet<()>>,
}

impl OfflineCacheAgent {
  pub fn new(config: AgentConfig, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
    Self {
      config,
      storage,
      network,
      pending: Mutex::new(JoinSet::new()),
    }
  }

  /// The cache generation this agent reads and writes.
  pub fn generation(&self) -> &str {
    &self.config.generation
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  /// Wait for every background cache write started so far.
  ///
  /// Writes still pending when the agent is dropped are aborted, so callers
  /// that need them stored settle before letting go of the agent.
  pub async fn settle(&self) {
    let mut pending = std::mem::take(&mut *self.pending());
    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Background cache write did not complete");
      }
    }
  }

  fn pending(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.pending.lock().unwrap_or_else(|e| e.into_inner())
  }
}
