//! GitLab REST API access: the raw client, its cached wrapper and the
//! epics aggregation built on both.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod epics;
pub mod error;
pub mod icons;
pub mod params;
pub mod types;

#[cfg(test)]
pub mod test_server;

pub use cached_client::{CachedGitLabClient, ListTarget};
pub use client::{GitLabClient, TlsOptions};
pub use error::ApiError;
pub use icons::IconCache;
pub use params::{FilterParams, IssueFilter};
pub use types::*;
