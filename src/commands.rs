//! Command-line subcommands and how their results are printed.

use clap::{Args, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use crate::cache::{
  CacheLayer, CacheResult, CacheSource, CacheStorage, FileStorage, Liveness, ResolveOptions,
};
use crate::config::Config;
use crate::gitlab::{
  ApiError, CachedGitLabClient, Epic, EpicQuery, EpicScope, EpicState, FilterParams, GitLabClient, Group,
  IconCache, Issue, IssueFilter, Label, ListTarget, MergeRequest, Milestone, Project, Todo, User,
};
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show the user behind the token
  Whoami {
    /// Download the avatar and print its local path
    #[arg(long)]
    avatar: bool,
  },
  /// Groups you are at least a developer of
  Groups {
    #[arg(long)]
    search: Option<String>,
  },
  /// Projects you are a member of
  Projects {
    #[arg(long)]
    search: Option<String>,
    /// Walk every page instead of the first 50
    #[arg(long)]
    all: bool,
  },
  /// Projects you have starred
  Starred {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    all: bool,
  },
  /// One project by id
  Project {
    id: u64,
  },
  Issues(ListArgs),
  /// Merge requests
  Mrs(ListArgs),
  Epics {
    #[arg(long, value_enum, default_value_t = EpicScope::All)]
    scope: EpicScope,
    #[arg(long, value_enum, default_value_t = EpicState::Opened)]
    state: EpicState,
    /// Only this group
    #[arg(long)]
    group: Option<u64>,
    /// Also list epics inherited from ancestor groups
    #[arg(long)]
    include_ancestors: bool,
  },
  Labels {
    #[arg(long)]
    project: u64,
  },
  /// Users matching a name, username or email
  Users {
    #[arg(long)]
    search: Option<String>,
  },
  /// Users with access to a project
  Members {
    #[arg(long)]
    project: u64,
  },
  Milestones {
    #[arg(long, conflicts_with = "group")]
    project: Option<u64>,
    #[arg(long)]
    group: Option<u64>,
  },
  /// Pending todos
  Todos {
    #[arg(long)]
    search: Option<String>,
  },
  /// Show or change your status message
  Status {
    #[command(subcommand)]
    action: Option<StatusAction>,
  },
  CreateIssue {
    #[arg(long)]
    project: u64,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    /// Comma-separated labels
    #[arg(long)]
    labels: Option<String>,
  },
  CreateMr {
    #[arg(long)]
    project: u64,
    #[arg(long)]
    source_branch: String,
    #[arg(long)]
    target_branch: Option<String>,
    #[arg(long)]
    title: String,
  },
  /// Delete every cached response and image
  ClearCache,
}

#[derive(Subcommand, Debug)]
pub enum StatusAction {
  Set {
    #[arg(long)]
    emoji: String,
    #[arg(long)]
    message: String,
    /// e.g. 30_minutes, 3_hours, 1_day
    #[arg(long)]
    clear_after: Option<String>,
  },
  Clear,
}

/// Filters shared by issue and merge request listings.
#[derive(Args, Debug)]
pub struct ListArgs {
  /// created_by_me, assigned_to_me or all
  #[arg(long)]
  scope: Option<String>,
  /// opened, closed, merged or all
  #[arg(long)]
  state: Option<String>,
  /// Comma-separated labels that must be present
  #[arg(long, default_value = "")]
  labels: String,
  /// Comma-separated labels that must be absent
  #[arg(long, default_value = "")]
  exclude_labels: String,
  #[arg(long)]
  search: Option<String>,
  /// Milestone title
  #[arg(long)]
  milestone: Option<String>,
  #[arg(long, conflicts_with = "group")]
  project: Option<u64>,
  #[arg(long)]
  group: Option<u64>,
}

impl ListArgs {
  fn filter(&self) -> IssueFilter {
    IssueFilter {
      scope: self.scope.clone(),
      state: self.state.clone(),
      search: self.search.clone(),
      include_labels: self.labels.clone(),
      exclude_labels: self.exclude_labels.clone(),
      milestone: self.milestone.clone(),
    }
  }

  fn target(&self) -> ListTarget {
    match (self.project, self.group) {
      (Some(id), _) => ListTarget::Project(id),
      (None, Some(id)) => ListTarget::Group(id),
      (None, None) => ListTarget::Mine,
    }
  }
}

/// One output line per item.
trait Row {
  fn row(&self) -> String;
}

impl Row for Group {
  fn row(&self) -> String {
    format!("{}\t{}\t{}", self.id, self.full_path, self.web_url)
  }
}

impl Row for Project {
  fn row(&self) -> String {
    format!("{}\t{}\t{}", self.id, self.full_path, self.web_url)
  }
}

impl Row for User {
  fn row(&self) -> String {
    format!("{}\t@{}\t{}", self.id, self.username, self.name)
  }
}

fn label_names(labels: &[Label]) -> String {
  labels
    .iter()
    .map(|l| l.name.as_str())
    .collect::<Vec<_>>()
    .join(",")
}

impl Row for Issue {
  fn row(&self) -> String {
    let reference = self
      .reference_full
      .clone()
      .unwrap_or_else(|| format!("#{}", self.iid));
    format!(
      "{}\t[{}]\t{}\t{}",
      reference,
      self.state,
      self.title,
      label_names(&self.labels)
    )
  }
}

impl Row for MergeRequest {
  fn row(&self) -> String {
    let reference = self
      .reference_full
      .clone()
      .unwrap_or_else(|| format!("!{}", self.iid));
    format!(
      "{}\t[{}]\t{}\t{}",
      reference,
      self.state,
      self.title,
      label_names(&self.labels)
    )
  }
}

impl Row for Epic {
  fn row(&self) -> String {
    format!("&{}\t[{}]\t{}\t{}", self.iid, self.state, self.title, self.web_url)
  }
}

impl Row for Label {
  fn row(&self) -> String {
    format!("{}\t{}", self.name, self.color)
  }
}

impl Row for Milestone {
  fn row(&self) -> String {
    format!("{}\t{}", self.id, self.title)
  }
}

impl Row for Todo {
  fn row(&self) -> String {
    format!("{}\t{}\t{}", self.action_name, self.title, self.target_url)
  }
}

fn print_rows<T: Row>(result: &CacheResult<Vec<T>>) {
  for item in &result.data {
    println!("{}", item.row());
  }
  if result.source == CacheSource::CacheStale {
    let when = result
      .cached_at
      .map(|t| t.to_rfc3339())
      .unwrap_or_else(|| "earlier".to_string());
    eprintln!("(cached at {}, refreshing in the background)", when);
  }
}

/// Resolve options that log how a background refresh of `what` went.
fn listing<T: 'static>(
  gl: &CachedGitLabClient,
  what: &'static str,
  liveness: &Liveness,
) -> ResolveOptions<Vec<T>, ApiError> {
  gl.options().on_refresh(
    move |result: Result<Vec<T>, ApiError>| match result {
      Ok(items) => info!(what, count = items.len(), "background refresh done"),
      Err(e) => warn!(what, error = %e, "background refresh failed"),
    },
    liveness.clone(),
  )
}

/// Run one subcommand to completion, including any background refresh it
/// started.
pub async fn run(command: Command, config: &Config) -> Result<()> {
  let token = Config::get_api_token()?;
  let client = GitLabClient::new(&config.gitlab.url, token, &config.tls_options()?)?;
  let cache = CacheLayer::new(FileStorage::new(Config::cache_dir()?));
  let gl = CachedGitLabClient::new(client, cache, config.cache.freshness());

  let liveness = Liveness::new();
  let outcome = dispatch(&gl, command, &liveness).await;
  if outcome.is_err() {
    // Refreshes still land in the cache, nobody reports them
    liveness.revoke();
  }
  gl.wait_idle().await;
  outcome
}

async fn dispatch(gl: &CachedGitLabClient, command: Command, liveness: &Liveness) -> Result<()> {
  match command {
    Command::Whoami { avatar } => {
      let me = gl.myself().await?;
      println!("{} ({})\t{}", me.username, me.name, me.web_url);
      if avatar {
        let url = me
          .avatar_url
          .ok_or_else(|| eyre!("{} has no avatar", me.username))?;
        let icons = IconCache::new(gl.client().clone(), Config::icon_dir()?);
        println!("{}", icons.path_for(&url).await?.display());
      }
    }
    Command::Groups { search } => {
      print_rows(&gl.user_groups(search.as_deref(), listing(gl, "groups", liveness)).await?);
    }
    Command::Projects { search, all } => {
      print_rows(&gl.user_projects(search.as_deref(), all, listing(gl, "projects", liveness)).await?);
    }
    Command::Starred { search, all } => {
      print_rows(
        &gl
          .starred_projects(search.as_deref(), all, listing(gl, "starred projects", liveness))
          .await?,
      );
    }
    Command::Project { id } => {
      let project = gl.project(id).await?;
      println!("{}", project.row());
      if let Some(branch) = &project.default_branch {
        println!("default branch: {}", branch);
      }
    }
    Command::Issues(args) => {
      print_rows(&gl.issues(&args.filter(), args.target(), listing(gl, "issues", liveness)).await?);
    }
    Command::Mrs(args) => {
      print_rows(
        &gl
          .merge_requests(&args.filter(), args.target(), listing(gl, "merge requests", liveness))
          .await?,
      );
    }
    Command::Epics {
      scope,
      state,
      group,
      include_ancestors,
    } => {
      let query = EpicQuery {
        scope,
        state,
        group_id: group,
        include_ancestors,
      };
      print_rows(&gl.epics(&query, listing(gl, "epics", liveness)).await?);
    }
    Command::Labels { project } => {
      print_rows(&gl.project_labels(project, listing(gl, "labels", liveness)).await?);
    }
    Command::Users { search } => {
      print_rows(&gl.users(search.as_deref(), listing(gl, "users", liveness)).await?);
    }
    Command::Members { project } => {
      print_rows(&gl.project_members(project, listing(gl, "members", liveness)).await?);
    }
    Command::Milestones { project, group } => {
      let milestones = match (project, group) {
        (Some(id), _) => gl.project_milestones(id, listing(gl, "milestones", liveness)).await?,
        (None, Some(id)) => gl.group_milestones(id, listing(gl, "milestones", liveness)).await?,
        (None, None) => return Err(eyre!("Pass --project or --group")),
      };
      print_rows(&milestones);
    }
    Command::Todos { search } => {
      print_rows(&gl.todos(search.as_deref(), listing(gl, "todos", liveness)).await?);
    }
    Command::Status { action: None } => {
      let status = gl.user_status().await?;
      if status.is_set() {
        println!(":{}: {}", status.emoji, status.message);
        if let Some(at) = status.clear_status_at {
          println!("clears at {}", at.to_rfc3339());
        }
      } else {
        println!("No status set");
      }
    }
    Command::Status {
      action:
        Some(StatusAction::Set {
          emoji,
          message,
          clear_after,
        }),
    } => {
      gl.set_user_status(&emoji, &message, clear_after.as_deref())
        .await?;
      println!("Status updated");
    }
    Command::Status {
      action: Some(StatusAction::Clear),
    } => {
      gl.clear_user_status().await?;
      println!("Status cleared");
    }
    Command::CreateIssue {
      project,
      title,
      description,
      labels,
    } => {
      let mut params = FilterParams::new().with("title", title);
      if let Some(description) = description {
        params.set("description", description);
      }
      if let Some(labels) = labels.filter(|l| !l.trim().is_empty()) {
        params.set("labels", labels);
      }
      match gl.create_issue(project, &params).await? {
        Some(issue) => println!("{}\t{}", issue.row(), issue.web_url),
        None => println!("Nothing changed"),
      }
    }
    Command::CreateMr {
      project,
      source_branch,
      target_branch,
      title,
    } => {
      let target_branch = match target_branch {
        Some(branch) => branch,
        None => gl
          .project(project)
          .await?
          .default_branch
          .ok_or_else(|| eyre!("Project {} has no default branch, pass --target-branch", project))?,
      };
      let params = FilterParams::new()
        .with("source_branch", source_branch)
        .with("target_branch", target_branch)
        .with("title", title);
      match gl.create_merge_request(project, &params).await? {
        Some(mr) => println!("{}\t{}", mr.row(), mr.web_url),
        None => println!("Nothing changed"),
      }
    }
    Command::ClearCache => clear_cache().await?,
  }
  Ok(())
}

/// Delete the cache directory. Needs neither a config file nor a token.
pub async fn clear_cache() -> Result<()> {
  clear_cache_dir(&Config::cache_dir()?).await?;
  println!("Cache cleared");
  Ok(())
}

async fn clear_cache_dir(dir: &Path) -> Result<()> {
  let storage = FileStorage::new(dir);
  storage.clear().await?;
  info!(dir = %storage.dir().display(), "cache cleared");
  Ok(())
}
