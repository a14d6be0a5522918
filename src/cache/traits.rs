//! Core traits and types for the cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::fetch::{Request, Response};

/// A stored response together with when it was written.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Summary of one stored entry, for listings.
#[derive(Debug, Clone)]
pub struct EntryInfo {
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Named stores of request/response pairs.
///
/// Each store is one cache generation. Entries are keyed by request URL
/// (fragment removed); only GET requests can be stored or matched.
/// Implementations serialise access internally and are shared between
/// concurrently running handlers.
pub trait CacheStorage: Send + Sync {
  /// Open the named store, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Whether a store with this name exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// Names of all stores, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up the response stored for `request` in the named store.
  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Store one pair, replacing any previous entry for the same request.
  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()>;

  /// Store several pairs atomically: either all are written or none are.
  fn put_all(&self, name: &str, pairs: Vec<(Request, Response)>) -> Result<()>;

  /// List entries of the named store, ordered by URL.
  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>>;
}

/// Reject pairs the cache refuses to hold.
pub fn check_storable(request: &Request, response: &Response) -> Result<()> {
  if request.method != Method::GET {
    return Err(eyre!(
      "Cannot cache {} request for {}: only GET is supported",
      request.method,
      request.url
    ));
  }
  if response.status == 206 {
    return Err(eyre!(
      "Cannot cache partial response (206) for {}",
      request.url
    ));
  }
  Ok(())
}

/// Canonical URL used as the entry key.
pub fn entry_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

/// Stable, fixed-length storage key for a URL.
pub fn entry_hash(url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(entry_url(url).as_bytes());
  hex::encode(hasher.finalize())
}
