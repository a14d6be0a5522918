use futures::future::try_join_all;
use tracing::{debug, error, info};
use url::Url;

use super::{AgentError, OfflineCacheAgent};
use crate::fetch::{Request, Response};
use crate::lifecycle::WorkerScope;

impl OfflineCacheAgent {
  /// Populate this agent's generation from the manifest.
  ///
  /// The offline document is stored on its own first; the rest of the
  /// manifest is fetched concurrently and stored in one batch that either
  /// lands completely or not at all. On success the host is asked to skip
  /// the waiting phase unless the agent is configured to wait. On failure the error is logged and returned so the
  /// host can discard this worker.
  pub async fn on_install(&self, scope: &dyn WorkerScope) -> Result<(), AgentError> {
    info!(generation = %self.config.generation, "Installing");

    if let Err(e) = self.populate().await {
      error!(generation = %self.config.generation, error = %e, "Install failed");
      return Err(e);
    }

    if self.config.skip_waiting {
      debug!("Skipping waiting - taking control immediately");
      scope.skip_waiting().await;
    }
    Ok(())
  }

  async fn populate(&self) -> Result<(), AgentError> {
    let generation = self.generation();
    self.storage.open(generation).map_err(AgentError::Storage)?;

    let offline_url = &self.config.offline_url;
    let (request, response) =
      self
        .fetch_for_cache(offline_url)
        .await
        .map_err(|reason| AgentError::OfflineDocument {
          url: offline_url.clone(),
          reason,
        })?;
    self
      .storage
      .put(generation, &request, response)
      .map_err(|e| AgentError::OfflineDocument {
        url: offline_url.clone(),
        reason: e.to_string(),
      })?;
    debug!(url = %offline_url, "Offline page cached");

    let batch = self
      .config
      .manifest
      .iter()
      .filter(|url| *url != offline_url)
      .map(|url| async move {
        self
          .fetch_for_cache(url)
          .await
          .map_err(|reason| AgentError::ManifestBatch {
            url: url.clone(),
            reason,
          })
      });
    let pairs = try_join_all(batch).await?;
    let count = pairs.len();

    self
      .storage
      .put_all(generation, pairs)
      .map_err(AgentError::Storage)?;

    info!(generation, resources = count + 1, "All resources cached");
    Ok(())
  }

  /// Fetch `url` for storage; anything but a 2xx response is a failure.
  async fn fetch_for_cache(&self, url: &Url) -> Result<(Request, Response), String> {
    let request = Request::get(url.clone());
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| e.to_string())?;

    if !response.ok() {
      return Err(format!("unexpected status {}", response.status));
    }
    Ok((request, response))
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{fixture, url, GENERATION};
  use crate::cache::CacheStorage;
  use crate::fetch::{Request, Response};
  use crate::lifecycle::testing::RecordingScope;
  use crate::agent::{AgentConfig, AgentError, OfflineCacheAgent};

  const MANIFEST: &[&str] = &["/", "/static/css/style.css", "/login", "/offline"];

  #[tokio::test]
  async fn test_install_caches_every_manifest_url() {
    let f = fixture(MANIFEST);
    let scope = RecordingScope::default();

    f.agent.on_install(&scope).await.unwrap();

    for path in MANIFEST {
      let entry = f
        .storage
        .match_request(GENERATION, &Request::get(url(path)))
        .unwrap()
        .unwrap_or_else(|| panic!("{} not cached", path));
      assert_eq!(entry.response.text(), format!("content of {}", path));
    }
    assert!(scope.skipped_waiting());
  }

  #[tokio::test]
  async fn test_waiting_agent_does_not_skip_waiting() {
    let mut f = fixture(MANIFEST);
    f.agent = OfflineCacheAgent::new(
      AgentConfig {
        skip_waiting: false,
        ..f.agent.config().clone()
      },
      f.storage.clone(),
      f.network.clone(),
    );
    let scope = RecordingScope::default();

    f.agent.on_install(&scope).await.unwrap();

    assert!(!scope.skipped_waiting());
    assert!(f.storage.has(GENERATION).unwrap());
  }

  #[tokio::test]
  async fn test_offline_document_failure_fails_install() {
    let f = fixture(MANIFEST);
    f.network.fail(url("/offline").as_str());
    let scope = RecordingScope::default();

    let err = f.agent.on_install(&scope).await.unwrap_err();
    assert!(matches!(err, AgentError::OfflineDocument { .. }));
    assert!(!scope.skipped_waiting());
    // The batch never ran
    assert!(f.storage.entries(GENERATION).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_document_bad_status_fails_install() {
    let f = fixture(MANIFEST);
    f.network.route(url("/offline").as_str(), Response::new(500, "boom"));

    let err = f.agent.on_install(&RecordingScope::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::OfflineDocument { .. }));
  }

  #[tokio::test]
  async fn test_batch_is_all_or_nothing() {
    let f = fixture(MANIFEST);
    f.network.route(url("/login").as_str(), Response::new(404, "gone"));
    let scope = RecordingScope::default();

    let err = f.agent.on_install(&scope).await.unwrap_err();
    match err {
      AgentError::ManifestBatch { url: failed, .. } => assert_eq!(failed, url("/login")),
      other => panic!("unexpected error: {}", other),
    }
    assert!(!scope.skipped_waiting());

    // Only the separately stored offline document made it in
    let urls: Vec<String> = f
      .storage
      .entries(GENERATION)
      .unwrap()
      .into_iter()
      .map(|e| e.url)
      .collect();
    assert_eq!(urls, vec![url("/offline").to_string()]);
  }

  #[tokio::test]
  async fn test_batch_transport_failure_fails_install() {
    let f = fixture(MANIFEST);
    f.network.fail(url("/static/css/style.css").as_str());

    let err = f.agent.on_install(&RecordingScope::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::ManifestBatch { .. }));
  }
}
