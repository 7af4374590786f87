//! Cache layer that orchestrates caching logic with network fetching.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::storage::{CacheEntry, CacheStorage};
use super::traits::{CacheResult, Clock, SystemClock};

/// Age thresholds, in seconds, that classify a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
  /// Below this age the entry is served as-is
  pub soft_secs: i64,
  /// At or above this age the entry is refetched before answering
  pub hard_secs: i64,
}

impl Default for Freshness {
  fn default() -> Self {
    Self {
      soft_secs: 300,
      hard_secs: 86_400,
    }
  }
}

/// How old a cache entry is relative to a [`Freshness`] window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
  Fresh,
  Stale,
  Expired,
}

impl Freshness {
  /// Entries never go stale. For data that practically never changes, like
  /// the identity behind the token.
  pub const PERMANENT: Freshness = Freshness {
    soft_secs: i64::MAX,
    hard_secs: i64::MAX,
  };

  pub fn new(soft_secs: i64, hard_secs: i64) -> Self {
    Self {
      soft_secs,
      hard_secs,
    }
  }

  pub fn classify(&self, age_secs: i64) -> Staleness {
    if age_secs >= self.hard_secs {
      Staleness::Expired
    } else if age_secs >= self.soft_secs {
      Staleness::Stale
    } else {
      Staleness::Fresh
    }
  }
}

/// Whether the caller still wants refresh notifications.
///
/// Revoking it does not cancel a running refresh, it only stops the
/// `on_refresh` callback from being invoked afterwards.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
  pub fn new() -> Self {
    Self(Arc::new(AtomicBool::new(true)))
  }

  pub fn revoke(&self) {
    self.0.store(false, Ordering::SeqCst);
  }

  pub fn is_alive(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

impl Default for Liveness {
  fn default() -> Self {
    Self::new()
  }
}

type Filter<T> = Arc<dyn Fn(T) -> T + Send + Sync>;
type RefreshCallback<T, E> = Arc<dyn Fn(Result<T, E>) + Send + Sync>;

/// Per-call knobs for [`CacheLayer::resolve`].
pub struct ResolveOptions<T, E> {
  freshness: Freshness,
  filter: Option<Filter<T>>,
  on_refresh: Option<RefreshCallback<T, E>>,
  liveness: Liveness,
}

impl<T, E> Default for ResolveOptions<T, E> {
  fn default() -> Self {
    Self {
      freshness: Freshness::default(),
      filter: None,
      on_refresh: None,
      liveness: Liveness::new(),
    }
  }
}

impl<T, E> ResolveOptions<T, E> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_freshness(mut self, freshness: Freshness) -> Self {
    self.freshness = freshness;
    self
  }

  /// Transform applied to every value handed back (cached or fetched).
  /// What gets stored is never filtered.
  pub fn with_filter(mut self, filter: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
    self.filter = Some(Arc::new(filter));
    self
  }

  /// Called with the outcome of a background refresh while `liveness` is
  /// still alive.
  pub fn on_refresh(
    mut self,
    callback: impl Fn(Result<T, E>) + Send + Sync + 'static,
    liveness: Liveness,
  ) -> Self {
    self.on_refresh = Some(Arc::new(callback));
    self.liveness = liveness;
    self
  }

  fn apply(&self, data: T) -> T {
    match &self.filter {
      Some(filter) => filter(data),
      None => data,
    }
  }
}

type SharedFetch<E> = Shared<BoxFuture<'static, Result<Value, E>>>;
type InFlight<E> = Arc<Mutex<HashMap<String, SharedFetch<E>>>>;

/// Stale-while-revalidate cache in front of arbitrary async fetchers.
///
/// - fresh entries are served directly
/// - stale entries are served and refreshed in the background
/// - missing or expired entries block on the fetcher
///
/// At most one fetch per key runs at a time; concurrent callers for the same
/// key await the same fetch.
pub struct CacheLayer<S: CacheStorage, E> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  in_flight: InFlight<E>,
}

impl<S, E> CacheLayer<S, E>
where
  S: CacheStorage,
  E: From<serde_json::Error> + fmt::Display + Clone + Send + Sync + 'static,
{
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Use `clock` for age calculations. Should be the storage's clock too.
  #[cfg(test)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  #[cfg(test)]
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Answer `key` from the cache or from `fetcher`, following the
  /// stale-while-revalidate rules of `options`.
  pub async fn resolve<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    options: ResolveOptions<T, E>,
  ) -> Result<CacheResult<T>, E>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let seen = self.storage.get(key).await;
    let cached = seen
      .as_ref()
      .and_then(|entry| match T::deserialize(&entry.payload) {
        Ok(data) => Some((data, entry.written_at_seconds)),
        Err(e) => {
          debug!(key, error = %e, "cached payload does not match, ignoring");
          None
        }
      });

    if let Some((data, written_at)) = cached {
      let age = self.clock.now_seconds().saturating_sub(written_at);
      match options.freshness.classify(age) {
        Staleness::Fresh => {
          debug!(key, age, "cache fresh");
          return Ok(CacheResult::from_cache(options.apply(data), written_at, false));
        }
        Staleness::Stale => {
          debug!(key, age, "cache stale, refreshing in background");
          self.refresh_in_background(key, seen, fetcher, &options);
          return Ok(CacheResult::from_cache(options.apply(data), written_at, true));
        }
        Staleness::Expired => debug!(key, age, "cache expired"),
      }
    }

    let value = self.fetch_shared(key, seen, fetcher).await?;
    let data: T = serde_json::from_value(value)?;
    Ok(CacheResult::from_network(options.apply(data)))
  }

  /// Wait for every fetch currently in flight to settle.
  pub async fn wait_idle(&self) {
    let pending: Vec<SharedFetch<E>> = self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    join_all(pending).await;
  }

  #[cfg(test)]
  fn in_flight_len(&self) -> usize {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Join the fetch already running for `key`, or register a new one.
  ///
  /// `seen` is the entry the caller read before deciding to fetch. A new
  /// fetch re-reads the store first: if the entry changed since, another
  /// fetch for `key` settled in between and its value is reused instead of
  /// calling `fetcher`. Otherwise the fetched value is written to storage
  /// before the fetch settles and removes itself from the in-flight map.
  fn fetch_shared<T, F, Fut>(&self, key: &str, seen: Option<CacheEntry>, fetcher: F) -> SharedFetch<E>
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(pending) = in_flight.get(key) {
      debug!(key, "joining in-flight fetch");
      return pending.clone();
    }

    let storage = Arc::clone(&self.storage);
    let registry = Arc::clone(&self.in_flight);
    let owned_key = key.to_string();

    let shared = async move {
      let result = match storage.get(&owned_key).await {
        Some(entry) if seen.as_ref() != Some(&entry) => {
          debug!(key = %owned_key, "entry rewritten since it was read, reusing it");
          Ok(entry.payload)
        }
        _ => {
          let result = match fetcher().await {
            Ok(data) => serde_json::to_value(data).map_err(E::from),
            Err(e) => Err(e),
          };
          if let Ok(value) = &result {
            storage.set(&owned_key, value).await;
          }
          result
        }
      };
      registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&owned_key);
      result
    }
    .boxed()
    .shared();

    in_flight.insert(key.to_string(), shared.clone());
    shared
  }

  fn refresh_in_background<T, F, Fut>(
    &self,
    key: &str,
    seen: Option<CacheEntry>,
    fetcher: F,
    options: &ResolveOptions<T, E>,
  ) where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let fetch = self.fetch_shared(key, seen, fetcher);
    let filter = options.filter.clone();
    let on_refresh = options.on_refresh.clone();
    let liveness = options.liveness.clone();
    let key = key.to_string();

    tokio::spawn(async move {
      let result = match fetch.await {
        Ok(value) => serde_json::from_value::<T>(value).map_err(E::from),
        Err(e) => Err(e),
      };
      if let Err(e) = &result {
        warn!(key, error = %e, "background refresh failed, keeping stale value");
      }

      if !liveness.is_alive() {
        debug!(key, "caller gone, dropping refresh notification");
        return;
      }
      if let Some(callback) = on_refresh {
        callback(result.map(|data| match &filter {
          Some(filter) => filter(data),
          None => data,
        }));
      }
    });
  }
}

impl<S: CacheStorage, E> Clone for CacheLayer<S, E> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}
