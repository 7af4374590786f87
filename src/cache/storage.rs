//! Cache storage trait and file-per-key JSON implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::traits::{Clock, SystemClock};

/// A single cached value as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  /// Wall-clock seconds at write time
  pub written_at_seconds: i64,
  /// Whatever the fetcher last produced, opaque to the store
  pub payload: Value,
}

/// Why a cache read or write did not go through.
///
/// Never surfaced past [`CacheStorage::get`] / [`CacheStorage::set`]; those
/// downgrade it to a miss or a dropped write.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("cache I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt cache entry at {path}: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Trait for cache storage backends.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
  /// Read an entry, reporting why it could not be read.
  async fn try_get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;

  /// Write an entry stamped with the current time, replacing any previous one.
  async fn try_set(&self, key: &str, payload: &Value) -> Result<(), StorageError>;

  /// Remove every entry.
  async fn clear(&self) -> Result<(), StorageError>;

  /// Read an entry; any failure counts as a miss.
  async fn get(&self, key: &str) -> Option<CacheEntry> {
    match self.try_get(key).await {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Write an entry; failures are logged and dropped.
  async fn set(&self, key: &str, payload: &Value) {
    if let Err(e) = self.try_set(key, payload).await {
      warn!(key, error = %e, "cache write failed");
    }
  }
}

/// Stores each key as `<dir>/<key>.json`.
pub struct FileStorage {
  dir: PathBuf,
  clock: Arc<dyn Clock>,
}

impl FileStorage {
  /// Storage rooted at `dir`. The directory is created on first write.
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      clock: Arc::new(SystemClock),
    }
  }

  /// Use `clock` to stamp written entries.
  #[cfg(test)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Path of the file backing `key`.
  ///
  /// Anything outside `[A-Za-z0-9_.-]` is replaced so a key can never escape
  /// the cache directory. A key that needed replacing also gets a digest of
  /// the raw key appended, keeping `a/b` and `a_b` apart.
  pub fn entry_path(&self, key: &str) -> PathBuf {
    let mut replaced = false;
    let mut name: String = key
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
          c
        } else {
          replaced = true;
          '_'
        }
      })
      .collect();

    if replaced {
      let digest = Sha256::digest(key.as_bytes());
      name.push('_');
      name.push_str(&hex::encode(&digest[..8]));
    }
    self.dir.join(format!("{}.json", name))
  }
}

#[async_trait]
impl CacheStorage for FileStorage {
  async fn try_get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
    let path = self.entry_path(key);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(StorageError::Io { path, source }),
    };

    serde_json::from_slice(&bytes)
      .map(Some)
      .map_err(|source| StorageError::Corrupt { path, source })
  }

  async fn try_set(&self, key: &str, payload: &Value) -> Result<(), StorageError> {
    let path = self.entry_path(key);
    let entry = CacheEntry {
      written_at_seconds: self.clock.now_seconds(),
      payload: payload.clone(),
    };
    let data = serde_json::to_vec(&entry).map_err(|source| StorageError::Corrupt {
      path: path.clone(),
      source,
    })?;

    tokio::fs::create_dir_all(&self.dir)
      .await
      .map_err(|source| StorageError::Io {
        path: self.dir.clone(),
        source,
      })?;
    tokio::fs::write(&path, data)
      .await
      .map_err(|source| StorageError::Io {
        path: path.clone(),
        source,
      })?;

    debug!(key, path = %path.display(), "cache entry written");
    Ok(())
  }

  async fn clear(&self) -> Result<(), StorageError> {
    match tokio::fs::remove_dir_all(&self.dir).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StorageError::Io {
        path: self.dir.clone(),
        source,
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::ManualClock;
  use serde_json::json;

  fn storage(dir: &Path) -> FileStorage {
    FileStorage::new(dir.join("cache")).with_clock(Arc::new(ManualClock::at(1_000)))
  }

  #[tokio::test]
  async fn test_set_then_get_returns_payload() {
    let tmp = tempfile::tempdir().unwrap();
    let store = storage(tmp.path());
    let payload = json!([{ "id": 1, "name": "alpha" }, { "id": 2, "labels": ["x"] }]);

    store.set("projects", &payload).await;
    let entry = store.get("projects").await.unwrap();

    assert_eq!(entry.payload, payload);
    assert_eq!(entry.written_at_seconds, 1_000);
  }

  #[tokio::test]
  async fn test_missing_key_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = storage(tmp.path());

    assert!(store.get("nothing").await.is_none());
    assert!(store.try_get("nothing").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_corrupt_entry_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = storage(tmp.path());
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.entry_path("broken"), b"{ not json").unwrap();

    assert!(store.get("broken").await.is_none());
    assert!(matches!(
      store.try_get("broken").await,
      Err(StorageError::Corrupt { .. })
    ));
  }

  #[tokio::test]
  async fn test_file_format() {
    let tmp = tempfile::tempdir().unwrap();
    let store = storage(tmp.path());
    store.set("user", &json!({ "id": 7 })).await;

    let raw = std::fs::read_to_string(tmp.path().join("cache").join("user.json")).unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value, json!({ "writtenAtSeconds": 1_000, "payload": { "id": 7 } }));
  }

  #[tokio::test]
  async fn test_set_replaces_previous_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at(10));
    let store = FileStorage::new(tmp.path().join("cache")).with_clock(clock.clone());

    store.set("k", &json!({ "a": 1 })).await;
    clock.set(20);
    store.set("k", &json!({ "b": 2 })).await;

    let entry = store.get("k").await.unwrap();
    assert_eq!(entry.payload, json!({ "b": 2 }));
    assert_eq!(entry.written_at_seconds, 20);
  }

  #[tokio::test]
  async fn test_write_failure_is_swallowed() {
    let tmp = tempfile::tempdir().unwrap();
    // A regular file where the cache directory should be
    let blocker = tmp.path().join("cache");
    std::fs::write(&blocker, b"").unwrap();
    let store = FileStorage::new(&blocker);

    store.set("k", &json!(1)).await;
    assert!(store.try_set("k", &json!(1)).await.is_err());
    assert!(store.get("k").await.is_none());
  }

  #[tokio::test]
  async fn test_clear_removes_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let store = storage(tmp.path());
    store.set("a", &json!(1)).await;
    store.set("b", &json!(2)).await;

    store.clear().await.unwrap();

    assert!(!store.dir().exists());
    assert!(store.get("a").await.is_none());
    // Clearing again is a no-op
    store.clear().await.unwrap();
  }

  #[test]
  fn test_entry_path_stays_inside_dir() {
    let store = FileStorage::new("/tmp/labpal-cache");

    let escaped = store.entry_path("../etc/passwd");
    assert_eq!(escaped.parent(), Some(Path::new("/tmp/labpal-cache")));
    let name = escaped.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with(".._etc_passwd_"), "{}", name);
    assert!(name.ends_with(".json"));

    assert_eq!(
      store.entry_path("mygroups_ab12"),
      PathBuf::from("/tmp/labpal-cache/mygroups_ab12.json")
    );
  }

  #[tokio::test]
  async fn test_keys_differing_only_in_replaced_chars_do_not_collide() {
    let tmp = tempfile::tempdir().unwrap();
    let store = storage(tmp.path());
    assert_ne!(store.entry_path("a/b"), store.entry_path("a_b"));
    assert_ne!(store.entry_path("a/b"), store.entry_path("a:b"));

    store.set("a/b", &json!(1)).await;
    store.set("a_b", &json!(2)).await;

    assert_eq!(store.get("a/b").await.unwrap().payload, json!(1));
    assert_eq!(store.get("a_b").await.unwrap().payload, json!(2));
  }
}
