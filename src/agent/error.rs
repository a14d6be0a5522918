use thiserror::Error;
use url::Url;

/// Failures that abort an install.
///
/// Everything else the agent does is best-effort and only logged.
#[derive(Error, Debug)]
pub enum AgentError {
  #[error("Failed to cache offline document {url}: {reason}")]
  OfflineDocument { url: Url, reason: String },

  #[error("Failed to cache manifest entry {url}: {reason}")]
  ManifestBatch { url: Url, reason: String },

  #[error("Cache storage error: {0}")]
  Storage(color_eyre::Report),
}
