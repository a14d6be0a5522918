//! Scripted network for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Network, NetworkError, Request, Response};

/// Serves canned responses by URL and can be switched offline.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<Vec<String>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `response` for `url`.
  pub fn route(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Make requests for `url` fail at the transport level.
  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().push(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let url = request.url.as_str();

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Unavailable(format!("offline: {}", url)));
    }
    if self.failing.lock().unwrap().iter().any(|u| u == url) {
      return Err(NetworkError::Unavailable(format!("connection refused: {}", url)));
    }

    let response = self.routes.lock().unwrap().get(url).cloned();
    Ok(response.unwrap_or_else(|| Response::new(404, "missing")).with_url(request.url.clone()))
  }
}
