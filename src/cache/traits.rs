//! Core traits and types for the caching system.

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock seconds for cache timestamps.
///
/// The store stamps entries with `now_seconds()` and the layer compares
/// against it, so both must share one clock.
pub trait Clock: Send + Sync {
  fn now_seconds(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_seconds(&self) -> i64 {
    Utc::now().timestamp()
  }
}

/// A clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock(std::sync::atomic::AtomicI64);

#[cfg(test)]
impl ManualClock {
  pub fn at(seconds: i64) -> Self {
    Self(std::sync::atomic::AtomicI64::new(seconds))
  }

  pub fn set(&self, seconds: i64) {
    self.0.store(seconds, std::sync::atomic::Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_seconds(&self) -> i64 {
    self.0.load(std::sync::atomic::Ordering::SeqCst)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  ///
  /// A stale result means a background refresh has been started.
  pub fn from_cache(data: T, written_at_seconds: i64, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Utc.timestamp_opt(written_at_seconds, 0).single(),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its soft age, refresh running in the background
  CacheStale,
}
