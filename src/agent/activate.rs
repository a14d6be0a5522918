use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::OfflineCacheAgent;
use crate::lifecycle::WorkerScope;

/// What an activation did. Failures here never abort activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale generations removed
  pub deleted: Vec<String>,
  /// Stale generations that could not be removed
  pub failed: Vec<String>,
  /// Clients taken over, or `None` if claiming failed
  pub claimed: Option<usize>,
}

impl OfflineCacheAgent {
  /// Remove every other cache generation and take control of open clients.
  ///
  /// Cleanup and claiming run concurrently and both finish before this
  /// returns.
  pub async fn on_activate(&self, scope: &dyn WorkerScope) -> ActivateReport {
    info!(generation = %self.config.generation, "Activating");

    let claim = async {
      match scope.claim_clients().await {
        Ok(count) => Some(count),
        Err(e) => {
          warn!(error = %e, "Failed to claim clients");
          None
        }
      }
    };

    let ((deleted, failed), claimed) = tokio::join!(self.delete_stale_generations(), claim);

    info!(
      deleted = deleted.len(),
      failed = failed.len(),
      "Activated and controlling pages"
    );

    ActivateReport {
      deleted,
      failed,
      claimed,
    }
  }

  async fn delete_stale_generations(&self) -> (Vec<String>, Vec<String>) {
    let names = match self.storage.keys() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate caches");
        return (Vec::new(), Vec::new());
      }
    };

    debug!("Cleaning old caches");
    let deletions = names
      .into_iter()
      .filter(|name| name != self.generation())
      .map(|name| {
        let storage = Arc::clone(&self.storage);
        async move {
          debug!(cache = %name, "Deleting old cache");
          let task_name = name.clone();
          let outcome = tokio::task::spawn_blocking(move || storage.delete(&task_name)).await;
          match outcome {
            Ok(Ok(_)) => Ok(name),
            Ok(Err(e)) => {
              warn!(cache = %name, error = %e, "Failed to delete old cache");
              Err(name)
            }
            Err(e) => {
              warn!(cache = %name, error = %e, "Cache deletion task failed");
              Err(name)
            }
          }
        }
      });

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    for outcome in join_all(deletions).await {
      match outcome {
        Ok(name) => deleted.push(name),
        Err(name) => failed.push(name),
      }
    }
    (deleted, failed)
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{agent_config, GENERATION};
  use super::*;
  use crate::cache::{CacheStorage, CachedEntry, EntryInfo, MemoryStorage};
  use crate::fetch::fake::FakeNetwork;
  use crate::fetch::{Network, Request, Response};
  use crate::lifecycle::testing::RecordingScope;
  use color_eyre::{eyre::eyre, Result};

  /// Refuses to delete one named store.
  struct StubbornStorage {
    inner: MemoryStorage,
    undeletable: &'static str,
  }

  impl CacheStorage for StubbornStorage {
    fn open(&self, name: &str) -> Result<()> {
      self.inner.open(name)
    }
    fn has(&self, name: &str) -> Result<bool> {
      self.inner.has(name)
    }
    fn keys(&self) -> Result<Vec<String>> {
      self.inner.keys()
    }
    fn delete(&self, name: &str) -> Result<bool> {
      if name == self.undeletable {
        return Err(eyre!("store {} is locked", name));
      }
      self.inner.delete(name)
    }
    fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedEntry>> {
      self.inner.match_request(name, request)
    }
    fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
      self.inner.put(name, request, response)
    }
    fn put_all(&self, name: &str, pairs: Vec<(Request, Response)>) -> Result<()> {
      self.inner.put_all(name, pairs)
    }
    fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
      self.inner.entries(name)
    }
  }

  fn agent_over(storage: Arc<dyn CacheStorage>) -> OfflineCacheAgent {
    OfflineCacheAgent::new(
      agent_config(&["/offline"]),
      storage,
      Arc::new(FakeNetwork::new()) as Arc<dyn Network>,
    )
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_generation() {
    let storage = Arc::new(MemoryStorage::new());
    for name in ["app-cache-v0", GENERATION, "app-cache-v1"] {
      storage.open(name).unwrap();
    }
    let agent = agent_over(storage.clone());

    let report = agent.on_activate(&RecordingScope::default()).await;

    assert_eq!(storage.keys().unwrap(), vec![GENERATION.to_string()]);
    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(deleted, vec!["app-cache-v0", "app-cache-v1"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.claimed, Some(0));
  }

  #[tokio::test]
  async fn test_failed_deletion_does_not_block_others() {
    let storage = Arc::new(StubbornStorage {
      inner: MemoryStorage::new(),
      undeletable: "locked-v1",
    });
    for name in ["locked-v1", "old-v2", GENERATION] {
      storage.open(name).unwrap();
    }
    let agent = agent_over(storage.clone());

    let report = agent.on_activate(&RecordingScope::default()).await;

    assert_eq!(report.deleted, vec!["old-v2".to_string()]);
    assert_eq!(report.failed, vec!["locked-v1".to_string()]);
    assert_eq!(
      storage.keys().unwrap(),
      vec!["locked-v1".to_string(), GENERATION.to_string()]
    );
  }

  #[tokio::test]
  async fn test_claim_failure_is_not_fatal() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("stale").unwrap();
    let agent = agent_over(storage.clone());
    let scope = RecordingScope::refusing_claim();

    let report = agent.on_activate(&scope).await;

    assert_eq!(report.claimed, None);
    assert_eq!(report.deleted, vec!["stale".to_string()]);
  }

  #[tokio::test]
  async fn test_claims_clients() {
    let agent = agent_over(Arc::new(MemoryStorage::new()));
    let scope = RecordingScope::with_clients(3);

    let report = agent.on_activate(&scope).await;
    assert_eq!(report.claimed, Some(3));
  }
}
