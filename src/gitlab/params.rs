//! Query parameters for GitLab list endpoints.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Parameter set for a request.
///
/// Serializes scalars as `key=value`, lists as repeated `key[]=value` and
/// negated lists as repeated `not[key][]=value`. Empty lists are dropped.
/// Keys are kept sorted so both the query string and the cache hash are
/// independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterParams {
  scalars: BTreeMap<String, String>,
  lists: BTreeMap<String, Vec<String>>,
  negated: BTreeMap<String, Vec<String>>,
}

impl FilterParams {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set `key=value`, replacing any previous value.
  pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
    self.scalars.insert(key.to_string(), value.to_string());
    self
  }

  /// Set `key` only if it is not already present.
  pub fn set_default(&mut self, key: &str, value: impl ToString) -> &mut Self {
    self
      .scalars
      .entry(key.to_string())
      .or_insert_with(|| value.to_string());
    self
  }

  /// Builder-style [`set`](Self::set).
  pub fn with(mut self, key: &str, value: impl ToString) -> Self {
    self.set(key, value);
    self
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.scalars.get(key).map(String::as_str)
  }

  /// Set `key[]=v` for each value. An empty list clears the key.
  pub fn set_list<I, V>(&mut self, key: &str, values: I) -> &mut Self
  where
    I: IntoIterator<Item = V>,
    V: ToString,
  {
    let values: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    if values.is_empty() {
      self.lists.remove(key);
    } else {
      self.lists.insert(key.to_string(), values);
    }
    self
  }

  /// Set `not[key][]=v` for each value. An empty list clears the key.
  pub fn set_not_list<I, V>(&mut self, key: &str, values: I) -> &mut Self
  where
    I: IntoIterator<Item = V>,
    V: ToString,
  {
    let values: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    if values.is_empty() {
      self.negated.remove(key);
    } else {
      self.negated.insert(key.to_string(), values);
    }
    self
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.scalars.is_empty() && self.lists.is_empty() && self.negated.is_empty()
  }

  /// Flatten into `(name, value)` pairs in a stable order.
  pub fn to_query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = self
      .scalars
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();

    for (key, values) in &self.lists {
      let name = format!("{}[]", key);
      pairs.extend(values.iter().map(|v| (name.clone(), v.clone())));
    }
    for (key, values) in &self.negated {
      let name = format!("not[{}][]", key);
      pairs.extend(values.iter().map(|v| (name.clone(), v.clone())));
    }
    pairs
  }

  /// JSON object for request bodies (POST / PUT).
  pub fn to_json_body(&self) -> Value {
    let mut body = Map::new();
    for (k, v) in &self.scalars {
      body.insert(k.clone(), Value::String(v.clone()));
    }
    for (k, values) in &self.lists {
      body.insert(k.clone(), Value::from(values.clone()));
    }
    if !self.negated.is_empty() {
      let not: Map<String, Value> = self
        .negated
        .iter()
        .map(|(k, values)| (k.clone(), Value::from(values.clone())))
        .collect();
      body.insert("not".to_string(), Value::Object(not));
    }
    Value::Object(body)
  }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// Filter form for issue and merge request listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
  /// `created_by_me`, `assigned_to_me` or `all`
  pub scope: Option<String>,
  /// `opened`, `closed`, `merged` or `all`
  pub state: Option<String>,
  pub search: Option<String>,
  /// Comma-separated labels that must be present
  pub include_labels: String,
  /// Comma-separated labels that must be absent
  pub exclude_labels: String,
  pub milestone: Option<String>,
}

impl IssueFilter {
  pub fn to_params(&self) -> FilterParams {
    let mut params = FilterParams::new();
    if let Some(scope) = &self.scope {
      params.set("scope", scope);
    }
    if let Some(state) = self.state.as_deref().filter(|s| *s != "all") {
      params.set("state", state);
    }
    if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
      params.set("search", search);
    }
    if let Some(milestone) = &self.milestone {
      params.set("milestone", milestone);
    }
    params.set_list("labels", split_list(&self.include_labels));
    params.set_not_list("labels", split_list(&self.exclude_labels));
    params
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn pairs(params: &FilterParams) -> Vec<(String, String)> {
    params.to_query_pairs()
  }

  fn pair(k: &str, v: &str) -> (String, String) {
    (k.to_string(), v.to_string())
  }

  #[test]
  fn test_label_filters_become_array_params() {
    let filter = IssueFilter {
      include_labels: "a,b".to_string(),
      exclude_labels: "c".to_string(),
      ..Default::default()
    };

    let pairs = pairs(&filter.to_params());

    assert!(pairs.contains(&pair("labels[]", "a")));
    assert!(pairs.contains(&pair("labels[]", "b")));
    assert!(pairs.contains(&pair("not[labels][]", "c")));
    assert!(pairs
      .iter()
      .all(|(k, _)| k != "includeLabels" && k != "excludeLabels"));
    assert_eq!(pairs.len(), 3);
  }

  #[test]
  fn test_empty_label_filters_produce_nothing() {
    let filter = IssueFilter {
      include_labels: String::new(),
      exclude_labels: " , ".to_string(),
      ..Default::default()
    };

    assert!(filter.to_params().is_empty());
  }

  #[test]
  fn test_state_all_is_omitted() {
    let filter = IssueFilter {
      scope: Some("assigned_to_me".to_string()),
      state: Some("all".to_string()),
      ..Default::default()
    };

    assert_eq!(
      pairs(&filter.to_params()),
      vec![pair("scope", "assigned_to_me")]
    );
  }

  #[test]
  fn test_pairs_are_sorted_and_stable() {
    let mut a = FilterParams::new();
    a.set("state", "opened").set("min_access_level", 30);
    let mut b = FilterParams::new();
    b.set("min_access_level", "30").set("state", "opened");

    assert_eq!(a, b);
    assert_eq!(
      pairs(&a),
      vec![pair("min_access_level", "30"), pair("state", "opened")]
    );
  }

  #[test]
  fn test_set_default_keeps_existing() {
    let mut params = FilterParams::new().with("min_access_level", 10);
    params.set_default("min_access_level", 30);
    params.set_default("with_labels_details", true);

    assert_eq!(params.get("min_access_level"), Some("10"));
    assert_eq!(params.get("with_labels_details"), Some("true"));
  }

  #[test]
  fn test_empty_list_clears_key() {
    let mut params = FilterParams::new();
    params.set_list("labels", ["x"]);
    params.set_list("labels", Vec::<String>::new());

    assert!(params.is_empty());
  }

  #[test]
  fn test_json_body() {
    let mut params = FilterParams::new().with("title", "Bug");
    params.set_list("labels", ["a", "b"]);

    assert_eq!(
      params.to_json_body(),
      json!({ "title": "Bug", "labels": ["a", "b"] })
    );
  }

  #[test]
  fn test_split_list() {
    assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
    assert!(split_list("").is_empty());
  }
}
