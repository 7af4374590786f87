//! Stable cache keys for parameterized queries.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Build a cache key from a human-readable prefix and a parameter record.
///
/// The record goes through `serde_json::Value`, whose maps are key-sorted, so
/// the same parameters always hash the same regardless of insertion order.
pub fn hash_record<T: Serialize + ?Sized>(record: &T, prefix: &str) -> String {
  // Serializing a map or struct into a Value cannot fail for our key types
  let canonical = serde_json::to_value(record)
    .map(|v| v.to_string())
    .unwrap_or_default();

  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  format!("{}_{}", prefix, hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_insertion_order_does_not_matter() {
    let mut a = HashMap::new();
    a.insert("scope", "created_by_me");
    a.insert("state", "opened");
    a.insert("min_access_level", "30");

    let mut b = HashMap::new();
    b.insert("min_access_level", "30");
    b.insert("state", "opened");
    b.insert("scope", "created_by_me");

    assert_eq!(hash_record(&a, "epics"), hash_record(&b, "epics"));
  }

  #[test]
  fn test_distinct_params_do_not_collide() {
    let opened = HashMap::from([("state", "opened")]);
    let closed = HashMap::from([("state", "closed")]);

    assert_ne!(hash_record(&opened, "issues"), hash_record(&closed, "issues"));
  }

  #[test]
  fn test_prefix_is_readable_and_separates_kinds() {
    let params = HashMap::from([("state", "opened")]);
    let key = hash_record(&params, "mygroups");

    assert!(key.starts_with("mygroups_"));
    assert_eq!(key.len(), "mygroups_".len() + 64);
    assert_ne!(key, hash_record(&params, "epics"));
  }
}
