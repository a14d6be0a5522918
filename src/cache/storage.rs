//! SQLite-backed cache storage.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

use super::traits::{check_storable, entry_hash, entry_url, CacheStorage, CachedEntry, EntryInfo};
use crate::fetch::{Request, Response};
use crate::lifecycle::RegistrationStore;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored request/response pairs, keyed by hashed request URL
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_url TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, entry_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(cache_name, url);

-- Which generation is live
CREATE TABLE IF NOT EXISTS registration (
    scope TEXT PRIMARY KEY,
    active TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Registration row key; one agent per database.
const REGISTRATION_SCOPE: &str = "/";

fn cache_exists(conn: &Connection, name: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |row| {
      row.get(0)
    })
    .optional()
    .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
  Ok(found.is_some())
}

fn insert_entry(conn: &Connection, name: &str, request: &Request, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, entry_hash, url, status, status_text, headers, body, response_url, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        entry_hash(&request.url),
        entry_url(&request.url),
        response.status,
        response.status_text,
        headers,
        response.body.as_ref(),
        response.url.as_ref().map(|u| u.as_str()),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", request.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    cache_exists(&conn, name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedEntry>> {
    if request.method != reqwest::Method::GET {
      return Ok(None);
    }

    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, response_url, cached_at FROM cache_entries
         WHERE cache_name = ? AND entry_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, Option<String>, String)> = stmt
      .query_row(params![name, entry_hash(&request.url)], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to match {}: {}", request.url, e))?;

    let Some((status, status_text, headers, body, response_url, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    let response = Response {
      status,
      status_text,
      headers,
      body: Bytes::from(body),
      url: response_url.and_then(|u| Url::parse(&u).ok()),
    };

    Ok(Some(CachedEntry {
      response,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
    check_storable(request, &response)?;

    let conn = self.lock()?;
    if !cache_exists(&conn, name)? {
      return Err(eyre!("Cache {} does not exist", name));
    }
    insert_entry(&conn, name, request, &response)
  }

  fn put_all(&self, name: &str, pairs: Vec<(Request, Response)>) -> Result<()> {
    for (request, response) in &pairs {
      check_storable(request, response)?;
    }

    let mut conn = self.lock()?;
    if !cache_exists(&conn, name)? {
      return Err(eyre!("Cache {} does not exist", name));
    }

    // Dropping the transaction without commit rolls back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for (request, response) in &pairs {
      insert_entry(&tx, name, request, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, length(body), cached_at FROM cache_entries
         WHERE cache_name = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(url, status, size, cached_at)| {
        Ok(EntryInfo {
          url,
          status,
          size: size.max(0) as usize,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

impl RegistrationStore for SqliteStorage {
  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    let active: Option<Option<String>> = conn
      .query_row(
        "SELECT active FROM registration WHERE scope = ?",
        params![REGISTRATION_SCOPE],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read registration: {}", e))?;
    Ok(active.flatten())
  }

  fn set_active_generation(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO registration (scope, active, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![REGISTRATION_SCOPE, name],
      )
      .map_err(|e| eyre!("Failed to update registration: {}", e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
