//! Cached GitLab client that wraps GitLabClient with transparent caching.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{hash_record, CacheLayer, CacheResult, FileStorage, Freshness, ResolveOptions};

use super::api_types::{
  decode, decode_list, ApiIssue, ApiLabel, ApiMergeRequest, ApiProject, ApiTodo, ApiUserStatus,
};
use super::client::GitLabClient;
use super::error::ApiError;
use super::params::{FilterParams, IssueFilter};
use super::types::{
  Group, Issue, Label, MergeRequest, Milestone, Project, Todo, User, UserStatus,
};

/// Most groups returned by a group search
const GROUP_SEARCH_LIMIT: usize = 50;

/// Where an issue or merge request listing looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListTarget {
  /// Everything visible to the current user
  #[default]
  Mine,
  Project(u64),
  Group(u64),
}

impl ListTarget {
  fn path(&self, resource: &str) -> String {
    match self {
      ListTarget::Mine => resource.to_string(),
      ListTarget::Project(id) => format!("projects/{}/{}", id, resource),
      ListTarget::Group(id) => format!("groups/{}/{}", id, resource),
    }
  }
}

/// GitLab client with transparent caching support.
///
/// Reads go through the stale-while-revalidate layer; writes go straight to
/// the server.
#[derive(Clone)]
pub struct CachedGitLabClient {
  pub(super) inner: GitLabClient,
  pub(super) cache: CacheLayer<FileStorage, ApiError>,
  freshness: Freshness,
}

impl CachedGitLabClient {
  pub fn new(
    inner: GitLabClient,
    cache: CacheLayer<FileStorage, ApiError>,
    freshness: Freshness,
  ) -> Self {
    Self {
      inner,
      cache,
      freshness,
    }
  }

  pub fn client(&self) -> &GitLabClient {
    &self.inner
  }

  /// Resolve options carrying the configured freshness window.
  pub fn options<T>(&self) -> ResolveOptions<T, ApiError> {
    ResolveOptions::new().with_freshness(self.freshness)
  }

  /// Wait for background refreshes to land in the cache.
  pub async fn wait_idle(&self) {
    self.cache.wait_idle().await
  }

  /// Cached GET of a list resource, decoded through wire type `A`.
  async fn cached_list<A, T>(
    &self,
    prefix: &str,
    path: String,
    params: FilterParams,
    all: bool,
    options: ResolveOptions<Vec<T>, ApiError>,
  ) -> Result<CacheResult<Vec<T>>, ApiError>
  where
    A: DeserializeOwned + Into<T> + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
  {
    let key = hash_record(&(&path, &params, all), prefix);
    let inner = self.inner.clone();

    self
      .cache
      .resolve(
        &key,
        move || async move {
          let json = inner.get(&path, &params, all).await?;
          decode_list::<A, T>(json)
        },
        options,
      )
      .await
  }

  /// The user behind the token. Cached without expiry.
  pub async fn myself(&self) -> Result<User, ApiError> {
    let inner = self.inner.clone();
    let result = self
      .cache
      .resolve(
        "user",
        move || async move { decode(inner.get("user", &FilterParams::new(), false).await?) },
        ResolveOptions::new().with_freshness(Freshness::PERMANENT),
      )
      .await?;

    Ok(result.data)
  }

  /// Groups the user is at least a developer of, optionally narrowed by a
  /// case-insensitive search on name and path.
  ///
  /// The full group list is cached; the search runs on the cached copy.
  pub async fn user_groups(
    &self,
    search: Option<&str>,
    options: ResolveOptions<Vec<Group>, ApiError>,
  ) -> Result<CacheResult<Vec<Group>>, ApiError> {
    let params = FilterParams::new().with("min_access_level", 30);

    let options = match search.map(str::to_lowercase).filter(|s| !s.is_empty()) {
      Some(needle) => options.with_filter(move |groups: Vec<Group>| {
        groups
          .into_iter()
          .filter(|g| {
            g.name.to_lowercase().contains(&needle) || g.full_path.to_lowercase().contains(&needle)
          })
          .take(GROUP_SEARCH_LIMIT)
          .collect()
      }),
      None => options,
    };

    self
      .cached_list::<Group, Group>("mygroups", "groups".to_string(), params, true, options)
      .await
  }

  /// Projects the user is a member of.
  pub async fn user_projects(
    &self,
    search: Option<&str>,
    all: bool,
    options: ResolveOptions<Vec<Project>, ApiError>,
  ) -> Result<CacheResult<Vec<Project>>, ApiError> {
    let mut params = FilterParams::new().with("min_access_level", 30);
    if let Some(search) = search.filter(|s| !s.is_empty()) {
      params.set("search", search);
    }

    self
      .cached_list::<ApiProject, Project>("projects", "projects".to_string(), params, all, options)
      .await
  }

  /// Projects the user has starred.
  pub async fn starred_projects(
    &self,
    search: Option<&str>,
    all: bool,
    options: ResolveOptions<Vec<Project>, ApiError>,
  ) -> Result<CacheResult<Vec<Project>>, ApiError> {
    let me = self.myself().await?;
    let mut params = FilterParams::new();
    if let Some(search) = search.filter(|s| !s.is_empty()) {
      params.set("search", search);
    }

    self
      .cached_list::<ApiProject, Project>(
        "starred",
        format!("users/{}/starred_projects", me.id),
        params,
        all,
        options,
      )
      .await
  }

  /// Users matching `search` by name, username or email.
  pub async fn users(
    &self,
    search: Option<&str>,
    options: ResolveOptions<Vec<User>, ApiError>,
  ) -> Result<CacheResult<Vec<User>>, ApiError> {
    let mut params = FilterParams::new();
    if let Some(search) = search.filter(|s| !s.is_empty()) {
      params.set("search", search);
    }

    self
      .cached_list::<User, User>("users", "users".to_string(), params, false, options)
      .await
  }

  /// Users with access to a project.
  pub async fn project_members(
    &self,
    project_id: u64,
    options: ResolveOptions<Vec<User>, ApiError>,
  ) -> Result<CacheResult<Vec<User>>, ApiError> {
    self
      .cached_list::<User, User>(
        "members",
        format!("projects/{}/users", project_id),
        FilterParams::new(),
        false,
        options,
      )
      .await
  }

  pub async fn project(&self, project_id: u64) -> Result<Project, ApiError> {
    let inner = self.inner.clone();
    let path = format!("projects/{}", project_id);
    let key = format!("project_{}", project_id);
    let result = self
      .cache
      .resolve(
        &key,
        move || async move {
          let project: ApiProject = decode(inner.get(&path, &FilterParams::new(), false).await?)?;
          Ok(Project::from(project))
        },
        self.options(),
      )
      .await?;

    Ok(result.data)
  }

  pub async fn issues(
    &self,
    filter: &IssueFilter,
    target: ListTarget,
    options: ResolveOptions<Vec<Issue>, ApiError>,
  ) -> Result<CacheResult<Vec<Issue>>, ApiError> {
    let mut params = filter.to_params();
    params.set_default("with_labels_details", true);

    self
      .cached_list::<ApiIssue, Issue>("issues", target.path("issues"), params, false, options)
      .await
  }

  pub async fn merge_requests(
    &self,
    filter: &IssueFilter,
    target: ListTarget,
    options: ResolveOptions<Vec<MergeRequest>, ApiError>,
  ) -> Result<CacheResult<Vec<MergeRequest>>, ApiError> {
    let mut params = filter.to_params();
    params.set_default("with_labels_details", true);

    self
      .cached_list::<ApiMergeRequest, MergeRequest>(
        "mrs",
        target.path("merge_requests"),
        params,
        false,
        options,
      )
      .await
  }

  /// Pending todos, optionally narrowed to titles containing `search`.
  pub async fn todos(
    &self,
    search: Option<&str>,
    options: ResolveOptions<Vec<Todo>, ApiError>,
  ) -> Result<CacheResult<Vec<Todo>>, ApiError> {
    let options = match search.map(str::to_lowercase).filter(|s| !s.is_empty()) {
      Some(needle) => options.with_filter(move |todos: Vec<Todo>| {
        todos
          .into_iter()
          .filter(|t| t.title.to_lowercase().contains(&needle))
          .collect()
      }),
      None => options,
    };

    self
      .cached_list::<ApiTodo, Todo>("todos", "todos".to_string(), FilterParams::new(), false, options)
      .await
  }

  /// Every label of a project (all pages).
  pub async fn project_labels(
    &self,
    project_id: u64,
    options: ResolveOptions<Vec<Label>, ApiError>,
  ) -> Result<CacheResult<Vec<Label>>, ApiError> {
    self
      .cached_list::<ApiLabel, Label>(
        "labels",
        format!("projects/{}/labels", project_id),
        FilterParams::new(),
        true,
        options,
      )
      .await
  }

  pub async fn project_milestones(
    &self,
    project_id: u64,
    options: ResolveOptions<Vec<Milestone>, ApiError>,
  ) -> Result<CacheResult<Vec<Milestone>>, ApiError> {
    self
      .cached_list::<Milestone, Milestone>(
        "milestones",
        format!("projects/{}/milestones", project_id),
        FilterParams::new(),
        false,
        options,
      )
      .await
  }

  pub async fn group_milestones(
    &self,
    group_id: u64,
    options: ResolveOptions<Vec<Milestone>, ApiError>,
  ) -> Result<CacheResult<Vec<Milestone>>, ApiError> {
    self
      .cached_list::<Milestone, Milestone>(
        "milestones",
        format!("groups/{}/milestones", group_id),
        FilterParams::new(),
        false,
        options,
      )
      .await
  }

  /// Current status message (not cached - the user edits it from here).
  pub async fn user_status(&self) -> Result<UserStatus, ApiError> {
    let status: ApiUserStatus = decode(self.inner.get("user/status", &FilterParams::new(), false).await?)?;
    Ok(status.into())
  }

  pub async fn set_user_status(
    &self,
    emoji: &str,
    message: &str,
    clear_after: Option<&str>,
  ) -> Result<(), ApiError> {
    let mut params = FilterParams::new().with("emoji", emoji).with("message", message);
    if let Some(after) = clear_after.filter(|a| !a.is_empty()) {
      params.set("clear_status_after", after);
    }
    self.inner.put("user/status", &params).await?;
    Ok(())
  }

  pub async fn clear_user_status(&self) -> Result<(), ApiError> {
    self.set_user_status("", "", None).await
  }

  /// Create an issue. Returns the created issue, or `None` if the server
  /// answered "not modified".
  pub async fn create_issue(
    &self,
    project_id: u64,
    params: &FilterParams,
  ) -> Result<Option<Issue>, ApiError> {
    debug!(project_id, title = params.get("title").unwrap_or_default(), "create issue");
    let json = self
      .inner
      .post(&format!("projects/{}/issues", project_id), params)
      .await?;
    decode_created::<ApiIssue, Issue>(json)
  }

  pub async fn create_merge_request(
    &self,
    project_id: u64,
    params: &FilterParams,
  ) -> Result<Option<MergeRequest>, ApiError> {
    debug!(project_id, title = params.get("title").unwrap_or_default(), "create merge request");
    let json = self
      .inner
      .post(&format!("projects/{}/merge_requests", project_id), params)
      .await?;
    decode_created::<ApiMergeRequest, MergeRequest>(json)
  }
}

fn decode_created<A, T>(json: Value) -> Result<Option<T>, ApiError>
where
  A: DeserializeOwned + Into<T>,
{
  match json {
    Value::Null => Ok(None),
    other => Ok(Some(decode::<A>(other)?.into())),
  }
}
