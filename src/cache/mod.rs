//! Generic stale-while-revalidate caching layer.
//!
//! This module knows nothing about GitLab. It provides:
//! - a JSON file-per-key store with write timestamps
//! - stable keys for parameterized queries
//! - a layer that serves fresh entries, refreshes stale ones in the
//!   background and blocks on missing or expired ones, with at most one
//!   fetch per key in flight

mod key;
mod layer;
mod storage;
mod traits;

pub use key::hash_record;
pub use layer::{CacheLayer, Freshness, Liveness, ResolveOptions};
pub use storage::{CacheStorage, FileStorage, StorageError};
pub use traits::{CacheResult, CacheSource};
