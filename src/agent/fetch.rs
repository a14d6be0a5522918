use std::sync::Arc;
use tracing::{debug, warn};

use super::OfflineCacheAgent;
use crate::fetch::{Request, Response};

impl OfflineCacheAgent {
  /// Produce the response for one request from a controlled page.
  ///
  /// Navigations go to the network and fall back to the cached offline
  /// document, then to an inline offline page. Other requests go to the
  /// network, writing 200 responses through to the cache in the background,
  /// and fall back to the cached copy, then to a 404. Network errors never
  /// reach the caller.
  pub async fn on_fetch(&self, request: Request) -> Response {
    debug!(url = %request.url, mode = ?request.mode, "Fetch request");

    if request.is_navigation() {
      self.fetch_navigation(&request).await
    } else {
      self.fetch_resource(request).await
    }
  }

  async fn fetch_navigation(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network request failed, returning offline page");
        let offline = Request::get(self.config.offline_url.clone());
        match self.cached(&offline) {
          Some(response) => {
            debug!("Found offline page in cache");
            response
          }
          None => {
            debug!("Offline page not found in cache, returning basic offline message");
            Response::offline_page()
          }
        }
      }
    }
  }

  async fn fetch_resource(&self, request: Request) -> Response {
    match self.network.fetch(&request).await {
      Ok(response) => {
        let to_cache = response.clone();
        if response.status == 200 {
          self.store_in_background(request, to_cache);
        }
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network request failed, checking cache");
        match self.cached(&request) {
          Some(response) => {
            debug!(url = %request.url, "Found cached response");
            response
          }
          None => {
            debug!(url = %request.url, "No cached response found");
            Response::not_found()
          }
        }
      }
    }
  }

  /// Look `request` up in this agent's generation. Storage errors count as a miss.
  fn cached(&self, request: &Request) -> Option<Response> {
    match self.storage.match_request(self.generation(), request) {
      Ok(entry) => entry.map(|e| e.response),
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  fn store_in_background(&self, request: Request, response: Response) {
    let storage = Arc::clone(&self.storage);
    let generation = self.config.generation.clone();

    let mut pending = self.pending();
    // Reap finished writes so the set does not grow without bound
    while pending.try_join_next().is_some() {}

    pending.spawn_blocking(move || {
      let result = storage
        .open(&generation)
        .and_then(|_| storage.put(&generation, &request, response));
      match result {
        Ok(()) => debug!(url = %request.url, "Cached response"),
        Err(e) => warn!(url = %request.url, error = %e, "Failed to cache response"),
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{fixture, url, GENERATION};
  use crate::cache::CacheStorage;
  use crate::fetch::{Request, Response, OFFLINE_FALLBACK_HTML};
  use crate::lifecycle::testing::RecordingScope;

  #[tokio::test]
  async fn test_navigation_online_returns_network_response_uncached() {
    let f = fixture(&["/offline"]);
    let page = Response::new(200, "<html>game 7</html>").with_header("Content-Type", "text/html");
    f.network.route(url("/game/7").as_str(), page.clone());

    let response = f.agent.on_fetch(Request::navigate(url("/game/7"))).await;
    f.agent.settle().await;

    assert_eq!(f.network.calls(), 1);
    assert_eq!(response.body, page.body);
    assert_eq!(response.headers, page.headers);
    assert!(f
      .storage
      .match_request(GENERATION, &Request::get(url("/game/7")))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_offline_document() {
    let f = fixture(&["/", "/offline"]);
    f.agent.on_install(&RecordingScope::default()).await.unwrap();
    f.network.set_offline(true);

    let response = f.agent.on_fetch(Request::navigate(url("/game/7"))).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "content of /offline");
  }

  #[tokio::test]
  async fn test_navigation_offline_without_cache_synthesizes_page() {
    let f = fixture(&["/offline"]);
    f.network.set_offline(true);

    let response = f.agent.on_fetch(Request::navigate(url("/"))).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("text/html"));
    assert!(response.text().contains("Offline"));
    assert_eq!(response.text(), OFFLINE_FALLBACK_HTML);
  }

  #[tokio::test]
  async fn test_resource_is_written_through_and_served_offline() {
    let f = fixture(&["/offline"]);
    let body = vec![0x89u8, b'P', b'N', b'G', 0, 1, 2, 3];
    f.network.route(
      url("/static/icons/favicon.png").as_str(),
      Response::new(200, body.clone()).with_header("Content-Type", "image/png"),
    );

    let online = f.agent.on_fetch(Request::get(url("/static/icons/favicon.png"))).await;
    assert_eq!(online.body.as_ref(), body.as_slice());
    f.agent.settle().await;

    f.network.set_offline(true);
    let offline = f.agent.on_fetch(Request::get(url("/static/icons/favicon.png"))).await;

    assert_eq!(offline.status, 200);
    assert_eq!(offline.body.as_ref(), body.as_slice());
    assert_eq!(offline.content_type(), Some("image/png"));
  }

  #[tokio::test]
  async fn test_non_200_responses_are_returned_but_not_cached() {
    let f = fixture(&["/offline"]);
    f.network.route(url("/api/missing").as_str(), Response::new(404, "nope"));
    f.network.route(url("/api/created").as_str(), Response::new(201, "made"));

    let missing = f.agent.on_fetch(Request::get(url("/api/missing"))).await;
    let created = f.agent.on_fetch(Request::get(url("/api/created"))).await;
    f.agent.settle().await;

    assert_eq!(missing.status, 404);
    assert_eq!(missing.text(), "nope");
    assert_eq!(created.status, 201);
    assert!(!f.storage.has(GENERATION).unwrap() || f.storage.entries(GENERATION).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_resource_offline_without_cache_is_404() {
    let f = fixture(&["/offline"]);
    f.network.set_offline(true);

    let response = f.agent.on_fetch(Request::get(url("/static/app.js"))).await;

    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not found");
    assert!(response.body.is_empty());
  }

  #[tokio::test]
  async fn test_cache_write_failure_does_not_affect_response() {
    let f = fixture(&["/offline"]);
    f.network.route(url("/search").as_str(), Response::new(200, "results"));

    // POST responses cannot be stored; the write fails in the background
    let request = Request::get(url("/search")).with_method(reqwest::Method::POST);
    let response = f.agent.on_fetch(request).await;
    f.agent.settle().await;

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "results");
    assert!(f.storage.entries(GENERATION).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_fetches_keep_entries_separate() {
    let f = fixture(&["/offline"]);
    let paths: Vec<String> = (0..16).map(|i| format!("/static/chunk-{}.js", i)).collect();
    for path in &paths {
      f.network.route(url(path).as_str(), Response::new(200, format!("chunk {}", path)));
    }

    let fetches = paths.iter().map(|p| f.agent.on_fetch(Request::get(url(p))));
    let responses = futures::future::join_all(fetches).await;
    f.agent.settle().await;

    for (path, response) in paths.iter().zip(&responses) {
      assert_eq!(response.text(), format!("chunk {}", path));
      let entry = f
        .storage
        .match_request(GENERATION, &Request::get(url(path)))
        .unwrap()
        .unwrap();
      assert_eq!(entry.response.text(), format!("chunk {}", path));
    }
  }
}
