//! On-disk cache of downloaded images (avatars).

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::cache::{hash_record, CacheStorage, FileStorage};

use super::client::GitLabClient;
use super::error::ApiError;

/// Downloads each image once and remembers where it put it.
///
/// Entries share the response cache format, with the local file path as
/// payload. Images never expire; a missing file is downloaded again.
pub struct IconCache {
  client: GitLabClient,
  storage: FileStorage,
}

impl IconCache {
  pub fn new(client: GitLabClient, dir: impl Into<PathBuf>) -> Self {
    Self {
      client,
      storage: FileStorage::new(dir),
    }
  }

  /// Local path of the image at `url`, downloading it if needed.
  pub async fn path_for(&self, url: &str) -> Result<PathBuf, ApiError> {
    let key = hash_record(url, "icon");

    if let Some(path) = self.cached_path(&key).await {
      debug!(url, path = %path.display(), "icon cached");
      return Ok(path);
    }

    let destination = self
      .storage
      .dir()
      .join(format!("{}{}", key, extension_of(url)));
    let path = self.client.download_file(url, &destination).await?;
    self
      .storage
      .set(&key, &Value::String(path.to_string_lossy().into_owned()))
      .await;
    Ok(path)
  }

  async fn cached_path(&self, key: &str) -> Option<PathBuf> {
    let entry = self.storage.get(key).await?;
    let path = PathBuf::from(entry.payload.as_str()?);
    match tokio::fs::try_exists(&path).await {
      Ok(true) => Some(path),
      _ => None,
    }
  }
}

/// `.png`-style suffix taken from the URL path, if it looks like one.
fn extension_of(url: &str) -> String {
  Url::parse(url)
    .ok()
    .and_then(|u| {
      Path::new(u.path())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gitlab::client::TlsOptions;
  use crate::gitlab::test_server::{MockResponse, TestServer};

  fn icons(server: &TestServer, dir: &Path) -> IconCache {
    let client = GitLabClient::new(&server.base_url, "token", &TlsOptions::default()).unwrap();
    IconCache::new(client, dir.join("img"))
  }

  #[tokio::test]
  async fn test_icon_is_downloaded_once() {
    let server = TestServer::start(|_| MockResponse::raw(200, "PNGDATA")).await;
    let tmp = tempfile::tempdir().unwrap();
    let icons = icons(&server, tmp.path());
    let url = format!("{}/uploads/avatar.PNG?width=64", server.base_url);

    let first = icons.path_for(&url).await.unwrap();
    let second = icons.path_for(&url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.extension().unwrap(), "png");
    assert!(first.starts_with(tmp.path().join("img")));
    assert_eq!(std::fs::read_to_string(&first).unwrap(), "PNGDATA");
    assert_eq!(server.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_missing_file_is_downloaded_again() {
    let server = TestServer::start(|_| MockResponse::raw(200, "PNGDATA")).await;
    let tmp = tempfile::tempdir().unwrap();
    let icons = icons(&server, tmp.path());
    let url = format!("{}/avatar", server.base_url);

    let path = icons.path_for(&url).await.unwrap();
    std::fs::remove_file(&path).unwrap();
    let again = icons.path_for(&url).await.unwrap();

    assert_eq!(path, again);
    assert!(again.exists());
    assert_eq!(server.requests().len(), 2);
  }

  #[tokio::test]
  async fn test_failed_download_is_not_recorded() {
    let server = TestServer::start(|_| MockResponse::raw(404, "nope")).await;
    let tmp = tempfile::tempdir().unwrap();
    let icons = icons(&server, tmp.path());
    let url = format!("{}/avatar.png", server.base_url);

    assert!(matches!(icons.path_for(&url).await, Err(ApiError::Download(_))));
    assert!(icons.storage.get(&hash_record(url.as_str(), "icon")).await.is_none());
  }

  #[test]
  fn test_extension_of() {
    assert_eq!(extension_of("https://x.test/a/b.jpeg?s=1"), ".jpeg");
    assert_eq!(extension_of("https://x.test/a/b"), "");
    assert_eq!(extension_of("https://x.test/a/b.toolongext"), "");
    assert_eq!(extension_of("not a url"), "");
  }
}
