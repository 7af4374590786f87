//! Domain types handed to the command layer and stored in the cache.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub name: String,
  pub username: String,
  pub web_url: String,
  pub avatar_url: Option<String>,
  pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: u64,
  pub name_with_namespace: String,
  pub full_path: String,
  pub web_url: String,
  pub star_count: u64,
  pub fork_count: u64,
  pub last_activity_at: String,
  pub readme_url: Option<String>,
  pub avatar_url: Option<String>,
  /// Absent when a project has several owners
  pub owner: Option<User>,
  pub ssh_url_to_repo: Option<String>,
  pub http_url_to_repo: Option<String>,
  pub default_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
  pub id: u64,
  pub name: String,
  pub path: String,
  pub full_name: String,
  pub full_path: String,
  pub web_url: String,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
  pub id: u64,
  pub iid: u64,
  pub group_id: u64,
  pub title: String,
  pub state: String,
  pub web_url: String,
  #[serde(default)]
  pub author: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
  pub id: u64,
  pub name: String,
  pub color: String,
  pub text_color: String,
  pub description: Option<String>,
  pub subscribed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
  pub id: u64,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
  pub id: u64,
  pub iid: u64,
  pub title: String,
  pub description: Option<String>,
  pub web_url: String,
  pub reference_full: Option<String>,
  pub state: String,
  pub updated_at: DateTime<Utc>,
  pub author: Option<User>,
  pub project_id: u64,
  pub milestone: Option<Milestone>,
  pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
  pub id: u64,
  pub iid: u64,
  pub title: String,
  pub description: Option<String>,
  pub web_url: String,
  pub reference_full: Option<String>,
  pub state: String,
  pub updated_at: DateTime<Utc>,
  pub author: Option<User>,
  pub project_id: u64,
  pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
  pub id: u64,
  pub title: String,
  pub action_name: String,
  pub target_url: String,
  pub target_type: String,
  pub project_with_namespace: Option<String>,
  pub group_full_path: Option<String>,
  pub author: Option<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
  pub emoji: String,
  pub message: String,
  pub clear_status_at: Option<DateTime<Utc>>,
}

impl UserStatus {
  pub fn is_set(&self) -> bool {
    !self.message.is_empty() || !self.emoji.is_empty()
  }
}

/// Who an epic listing is restricted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum EpicScope {
  CreatedByMe,
  #[default]
  All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum EpicState {
  #[default]
  Opened,
  Closed,
  All,
}

impl EpicState {
  pub fn as_str(&self) -> &'static str {
    match self {
      EpicState::Opened => "opened",
      EpicState::Closed => "closed",
      EpicState::All => "all",
    }
  }
}

/// Parameters of an epic listing across groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicQuery {
  pub scope: EpicScope,
  pub state: EpicState,
  /// Only this group, instead of every group the user can reach
  pub group_id: Option<u64>,
  pub include_ancestors: bool,
}
