//! In-process cache storage.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::traits::{check_storable, entry_url, CacheStorage, CachedEntry, EntryInfo};
use crate::fetch::{Request, Response};
use crate::lifecycle::RegistrationStore;

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  /// Stores in creation order; entries keyed by canonical URL
  caches: Mutex<Vec<(String, BTreeMap<String, CachedEntry>)>>,
  active: Mutex<Option<String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_caches<R>(
    &self,
    f: impl FnOnce(&mut Vec<(String, BTreeMap<String, CachedEntry>)>) -> Result<R>,
  ) -> Result<R> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    f(&mut caches)
  }
}

fn find<'a>(
  caches: &'a mut [(String, BTreeMap<String, CachedEntry>)],
  name: &str,
) -> Option<&'a mut BTreeMap<String, CachedEntry>> {
  caches
    .iter_mut()
    .find(|(n, _)| n == name)
    .map(|(_, entries)| entries)
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.with_caches(|caches| {
      if find(caches, name).is_none() {
        caches.push((name.to_string(), BTreeMap::new()));
      }
      Ok(())
    })
  }

  fn has(&self, name: &str) -> Result<bool> {
    self.with_caches(|caches| Ok(find(caches, name).is_some()))
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.with_caches(|caches| Ok(caches.iter().map(|(n, _)| n.clone()).collect()))
  }

  fn delete(&self, name: &str) -> Result<bool> {
    self.with_caches(|caches| {
      let before = caches.len();
      caches.retain(|(n, _)| n != name);
      Ok(caches.len() != before)
    })
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedEntry>> {
    if request.method != reqwest::Method::GET {
      return Ok(None);
    }
    let key = entry_url(&request.url);
    self.with_caches(|caches| Ok(find(caches, name).and_then(|entries| entries.get(&key).cloned())))
  }

  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
    self.put_all(name, vec![(request.clone(), response)])
  }

  fn put_all(&self, name: &str, pairs: Vec<(Request, Response)>) -> Result<()> {
    for (request, response) in &pairs {
      check_storable(request, response)?;
    }

    self.with_caches(|caches| {
      let entries = find(caches, name).ok_or_else(|| eyre!("Cache {} does not exist", name))?;
      let cached_at = Utc::now();
      for (request, response) in pairs {
        entries.insert(
          entry_url(&request.url),
          CachedEntry {
            response,
            cached_at,
          },
        );
      }
      Ok(())
    })
  }

  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
    self.with_caches(|caches| {
      Ok(
        find(caches, name)
          .map(|entries| {
            entries
              .iter()
              .map(|(url, entry)| EntryInfo {
                url: url.clone(),
                status: entry.response.status,
                size: entry.response.body.len(),
                cached_at: entry.cached_at,
              })
              .collect()
          })
          .unwrap_or_default(),
      )
    })
  }
}

impl RegistrationStore for MemoryStorage {
  fn active_generation(&self) -> Result<Option<String>> {
    let active = self
      .active
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(active.clone())
  }

  fn set_active_generation(&self, name: &str) -> Result<()> {
    let mut active = self
      .active
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *active = Some(name.to_string());
    Ok(())
  }
}
