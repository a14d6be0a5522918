//! Request and response values passed between the agent, the network and the cache.

use bytes::Bytes;
use reqwest::Method;
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full-page navigation (top-level document load)
  Navigate,
  /// Same-origin subresource
  SameOrigin,
  /// Cross-origin subresource with CORS
  #[default]
  Cors,
  /// Opaque cross-origin subresource
  NoCors,
}

/// An outgoing request from a controlled page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A GET subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      headers: Vec::new(),
    }
  }

  /// A top-level navigation request.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A response produced by the network, the cache, or synthesized locally.
///
/// The body is a shared `Bytes` buffer, so `clone()` duplicates the response
/// without copying the payload. A response that is both stored and returned
/// must be cloned before either copy is handed off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  /// Final URL after redirects; `None` for synthesized responses
  pub url: Option<Url>,
}

/// Body of the last-resort document returned for navigations while offline.
pub const OFFLINE_FALLBACK_HTML: &str =
  "<html><body><h1>Offline</h1><p>The offline page could not be loaded.</p></body></html>";

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      status_text: default_status_text(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
      url: None,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
    self.status_text = text.into();
    self
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  /// Minimal inline HTML announcing offline status.
  pub fn offline_page() -> Self {
    Self::new(200, OFFLINE_FALLBACK_HTML).with_header("Content-Type", "text/html")
  }

  /// Empty 404 returned when neither network nor cache can answer.
  pub fn not_found() -> Self {
    Self::new(404, Bytes::new()).with_status_text("Not found")
  }

  /// Status in the 200..=299 range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup (first match).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn default_status_text(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_page_is_html_success() {
    let response = Response::offline_page();
    assert_eq!(response.status, 200);
    assert!(response.ok());
    assert_eq!(response.content_type(), Some("text/html"));
    assert!(response.text().contains("Offline"));
  }

  #[test]
  fn test_not_found_is_empty() {
    let response = Response::not_found();
    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not found");
    assert!(response.body.is_empty());
    assert!(!response.ok());
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = Response::new(200, "x").with_header("Content-Type", "text/css");
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.header("CONTENT-TYPE"), Some("text/css"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_clone_shares_body() {
    let original = Response::new(200, vec![1u8, 2, 3]);
    let copy = original.clone();
    assert_eq!(original.body.as_ptr(), copy.body.as_ptr());
    assert_eq!(original, copy);
  }

  #[test]
  fn test_navigate_request() {
    let url = Url::parse("https://app.example/").unwrap();
    assert!(Request::navigate(url.clone()).is_navigation());
    assert!(!Request::get(url).is_navigation());
  }
}
