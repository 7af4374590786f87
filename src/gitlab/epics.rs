//! Epics gathered across every group the user can reach.

use futures::future::join_all;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::cache::{hash_record, CacheResult, ResolveOptions};

use super::api_types::decode_list;
use super::cached_client::CachedGitLabClient;
use super::error::ApiError;
use super::params::FilterParams;
use super::types::{Epic, EpicQuery, EpicScope, EpicState};

impl CachedGitLabClient {
  /// Cached [`list_epics`](Self::list_epics).
  pub async fn epics(
    &self,
    query: &EpicQuery,
    options: ResolveOptions<Vec<Epic>, ApiError>,
  ) -> Result<CacheResult<Vec<Epic>>, ApiError> {
    let key = hash_record(query, "epics");
    let this = self.clone();
    let query = query.clone();

    self
      .cache
      .resolve(&key, move || async move { this.list_epics(&query).await }, options)
      .await
  }

  /// Fetch epics for one group, or for every group the user is a developer of.
  ///
  /// A group whose epics cannot be fetched contributes nothing, whatever the
  /// reason. Only the lookups done before any group is touched can fail.
  pub async fn list_epics(&self, query: &EpicQuery) -> Result<Vec<Epic>, ApiError> {
    let params = self.epic_params(query).await?;

    if let Some(group_id) = query.group_id {
      return Ok(self.group_epics(group_id, &params).await);
    }

    let groups = self.user_groups(None, self.options()).await?.data;
    debug!(groups = groups.len(), "fetching epics per group");

    let fetches: Vec<_> = groups
      .iter()
      .map(|g| self.group_epics(g.id, &params))
      .collect();
    let mut epics: Vec<Epic> = join_all(fetches).await.into_iter().flatten().collect();

    if query.include_ancestors {
      epics = dedupe_by_id(epics);
    }
    Ok(epics)
  }

  async fn epic_params(&self, query: &EpicQuery) -> Result<FilterParams, ApiError> {
    let mut params = FilterParams::new()
      .with("min_access_level", 30)
      .with("include_ancestor_groups", query.include_ancestors)
      .with("include_descendant_groups", false);

    if query.state != EpicState::All {
      params.set("state", query.state.as_str());
    }
    if query.scope == EpicScope::CreatedByMe {
      let me = self.myself().await?;
      params.set("author_id", me.id);
    }
    Ok(params)
  }

  async fn group_epics(&self, group_id: u64, params: &FilterParams) -> Vec<Epic> {
    let path = format!("groups/{}/epics", group_id);
    let result = match self.inner.get(&path, params, true).await {
      Ok(json) => decode_list::<Epic, Epic>(json),
      Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
      warn!(group_id, error = %e, "skipping group epics");
      Vec::new()
    })
  }
}

/// Keep the first epic of each id, preserving order.
pub fn dedupe_by_id(epics: Vec<Epic>) -> Vec<Epic> {
  let mut seen = HashSet::new();
  epics.into_iter().filter(|e| seen.insert(e.id)).collect()
}
