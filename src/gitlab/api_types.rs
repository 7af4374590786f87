//! Serde-deserializable types matching GitLab API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs. Required fields
//! are non-optional, so a response missing one fails to decode instead of
//! producing a half-filled value.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::error::ApiError;
use super::types::{Issue, Label, MergeRequest, Milestone, Project, Todo, User, UserStatus};

/// Decode a JSON value into a typed response.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
  serde_json::from_value(value).map_err(ApiError::from)
}

/// Decode a JSON array of wire items and convert each into its domain type.
pub fn decode_list<A, T>(value: Value) -> Result<Vec<T>, ApiError>
where
  A: DeserializeOwned + Into<T>,
{
  let items: Vec<A> = decode(value)?;
  Ok(items.into_iter().map(Into::into).collect())
}

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiReferences {
  pub full: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiNamed {
  pub name_with_namespace: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTodoGroup {
  pub full_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTodoTarget {
  pub title: String,
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiProject {
  pub id: u64,
  pub name_with_namespace: String,
  pub path_with_namespace: String,
  pub web_url: String,
  #[serde(default)]
  pub star_count: u64,
  #[serde(default)]
  pub forks_count: u64,
  #[serde(default)]
  pub last_activity_at: String,
  pub readme_url: Option<String>,
  pub avatar_url: Option<String>,
  pub owner: Option<User>,
  pub ssh_url_to_repo: Option<String>,
  pub http_url_to_repo: Option<String>,
  pub default_branch: Option<String>,
}

impl From<ApiProject> for Project {
  fn from(p: ApiProject) -> Self {
    Project {
      id: p.id,
      name_with_namespace: p.name_with_namespace,
      full_path: p.path_with_namespace,
      web_url: p.web_url,
      star_count: p.star_count,
      fork_count: p.forks_count,
      last_activity_at: p.last_activity_at,
      readme_url: p.readme_url,
      avatar_url: p.avatar_url,
      owner: p.owner,
      ssh_url_to_repo: p.ssh_url_to_repo,
      http_url_to_repo: p.http_url_to_repo,
      default_branch: p.default_branch,
    }
  }
}

// ============================================================================
// Labels
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
  pub id: u64,
  pub name: String,
  pub color: String,
  #[serde(default)]
  pub text_color: String,
  pub description: Option<String>,
  #[serde(default)]
  pub subscribed: bool,
}

impl From<ApiLabel> for Label {
  fn from(l: ApiLabel) -> Self {
    Label {
      id: l.id,
      name: l.name,
      color: l.color,
      text_color: l.text_color,
      description: l.description,
      subscribed: l.subscribed,
    }
  }
}

// ============================================================================
// Issues and merge requests (requested with `with_labels_details=true`)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiIssue {
  pub id: u64,
  pub iid: u64,
  pub title: String,
  pub description: Option<String>,
  pub web_url: String,
  pub references: Option<ApiReferences>,
  pub state: String,
  pub updated_at: DateTime<Utc>,
  pub author: Option<User>,
  pub project_id: u64,
  pub milestone: Option<Milestone>,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
}

impl From<ApiIssue> for Issue {
  fn from(i: ApiIssue) -> Self {
    Issue {
      id: i.id,
      iid: i.iid,
      title: i.title,
      description: i.description,
      web_url: i.web_url,
      reference_full: i.references.map(|r| r.full),
      state: i.state,
      updated_at: i.updated_at,
      author: i.author,
      project_id: i.project_id,
      milestone: i.milestone,
      labels: i.labels.into_iter().map(Label::from).collect(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiMergeRequest {
  pub id: u64,
  pub iid: u64,
  pub title: String,
  pub description: Option<String>,
  pub web_url: String,
  pub references: Option<ApiReferences>,
  pub state: String,
  pub updated_at: DateTime<Utc>,
  pub author: Option<User>,
  pub project_id: u64,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
}

impl From<ApiMergeRequest> for MergeRequest {
  fn from(mr: ApiMergeRequest) -> Self {
    MergeRequest {
      id: mr.id,
      iid: mr.iid,
      title: mr.title,
      description: mr.description,
      web_url: mr.web_url,
      reference_full: mr.references.map(|r| r.full),
      state: mr.state,
      updated_at: mr.updated_at,
      author: mr.author,
      project_id: mr.project_id,
      labels: mr.labels.into_iter().map(Label::from).collect(),
    }
  }
}

// ============================================================================
// Todos
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTodo {
  pub id: u64,
  pub action_name: String,
  pub target_url: String,
  pub target_type: String,
  pub target: ApiTodoTarget,
  pub project: Option<ApiNamed>,
  pub group: Option<ApiTodoGroup>,
  pub author: Option<User>,
}

impl From<ApiTodo> for Todo {
  fn from(t: ApiTodo) -> Self {
    Todo {
      id: t.id,
      title: t.target.title,
      action_name: t.action_name,
      target_url: t.target_url,
      target_type: t.target_type,
      project_with_namespace: t.project.map(|p| p.name_with_namespace),
      group_full_path: t.group.map(|g| g.full_path),
      author: t.author,
    }
  }
}

// ============================================================================
// User status
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiUserStatus {
  pub emoji: Option<String>,
  pub message: Option<String>,
  pub clear_status_at: Option<DateTime<Utc>>,
}

impl From<ApiUserStatus> for UserStatus {
  fn from(s: ApiUserStatus) -> Self {
    UserStatus {
      emoji: s.emoji.unwrap_or_default(),
      message: s.message.unwrap_or_default(),
      clear_status_at: s.clear_status_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn user_json() -> Value {
    json!({
      "id": 1,
      "name": "Ada",
      "username": "ada",
      "web_url": "https://gitlab.example.com/ada",
      "avatar_url": null,
      "state": "active"
    })
  }

  #[test]
  fn test_project_maps_renamed_fields() {
    let value = json!([{
      "id": 5,
      "name_with_namespace": "Group / Tool",
      "path_with_namespace": "group/tool",
      "web_url": "https://gitlab.example.com/group/tool",
      "star_count": 3,
      "forks_count": 2,
      "last_activity_at": "2024-01-01T00:00:00Z",
      "owner": null
    }]);

    let projects: Vec<Project> = decode_list::<ApiProject, _>(value).unwrap();

    assert_eq!(projects[0].full_path, "group/tool");
    assert_eq!(projects[0].fork_count, 2);
    assert!(projects[0].owner.is_none());
  }

  #[test]
  fn test_issue_flattens_references_and_labels() {
    let value = json!({
      "id": 100,
      "iid": 4,
      "title": "Crash on start",
      "description": null,
      "web_url": "https://gitlab.example.com/group/tool/-/issues/4",
      "references": { "short": "#4", "full": "group/tool#4" },
      "state": "opened",
      "updated_at": "2024-03-05T10:00:00.000Z",
      "author": user_json(),
      "project_id": 5,
      "milestone": { "id": 9, "title": "v1", "state": "active" },
      "labels": [{ "id": 1, "name": "bug", "color": "#f00", "text_color": "#fff", "description": null }]
    });

    let issue: Issue = decode::<ApiIssue>(value).unwrap().into();

    assert_eq!(issue.reference_full.as_deref(), Some("group/tool#4"));
    assert_eq!(issue.milestone.unwrap().title, "v1");
    assert_eq!(issue.labels[0].name, "bug");
    assert!(!issue.labels[0].subscribed);
    assert_eq!(issue.author.unwrap().username, "ada");
  }

  #[test]
  fn test_missing_required_field_is_rejected() {
    let value = json!([{ "id": 1, "name": "no username", "web_url": "x", "state": "active" }]);

    let err = decode::<Vec<User>>(value).unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)));
    assert!(err.to_string().contains("username"));
  }

  #[test]
  fn test_todo_takes_title_from_target() {
    let value = json!({
      "id": 3,
      "action_name": "mentioned",
      "target_url": "https://gitlab.example.com/group/tool/-/issues/4",
      "target_type": "Issue",
      "target": { "title": "Crash on start" },
      "project": { "name_with_namespace": "Group / Tool" },
      "author": user_json()
    });

    let todo: Todo = decode::<ApiTodo>(value).unwrap().into();

    assert_eq!(todo.title, "Crash on start");
    assert_eq!(todo.project_with_namespace.as_deref(), Some("Group / Tool"));
    assert!(todo.group_full_path.is_none());
  }

  #[test]
  fn test_empty_status_is_not_set() {
    let status: UserStatus = decode::<ApiUserStatus>(json!({ "emoji": null, "message": "" }))
      .unwrap()
      .into();
    assert!(!status.is_set());

    let status: UserStatus = decode::<ApiUserStatus>(json!({ "emoji": "coffee", "message": null }))
      .unwrap()
      .into();
    assert!(status.is_set());
  }
}
