use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Identity, Method, Response, StatusCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::error::{error_for_status, ApiError};
use super::params::FilterParams;

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const NEXT_PAGE_HEADER: &str = "x-next-page";

/// Page size for a single-page listing
pub const PER_PAGE: u32 = 50;
/// Page size when walking every page
pub const PER_PAGE_ALL: u32 = 100;

/// TLS trust settings, read from configuration.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
  /// Extra root certificate (PEM)
  pub ca_cert_pem: Option<Vec<u8>>,
  /// Client certificate and private key (PEM)
  pub client_identity_pem: Option<Vec<u8>>,
  /// Skip certificate verification entirely
  pub accept_invalid_certs: bool,
}

/// GitLab REST client
#[derive(Clone)]
pub struct GitLabClient {
  http: reqwest::Client,
  base_url: String,
  token: String,
}

impl GitLabClient {
  pub fn new(base_url: &str, token: impl Into<String>, tls: &TlsOptions) -> Result<Self, ApiError> {
    let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(tls.accept_invalid_certs);

    if let Some(pem) = &tls.ca_cert_pem {
      let cert = Certificate::from_pem(pem)
        .map_err(|e| ApiError::Config(format!("invalid CA certificate: {}", e)))?;
      builder = builder.add_root_certificate(cert);
    }
    if let Some(pem) = &tls.client_identity_pem {
      let identity = Identity::from_pem(pem)
        .map_err(|e| ApiError::Config(format!("invalid client certificate: {}", e)))?;
      builder = builder.identity(identity);
    }

    let http = builder
      .build()
      .map_err(|e| ApiError::Config(format!("failed to create HTTP client: {}", e)))?;

    // Validate once so every later endpoint() call only appends a path
    Url::parse(base_url)?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      token: token.into(),
    })
  }

  /// Full URL of an API resource, e.g. `projects/5/issues`.
  pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    let url = format!("{}/api/v4/{}", self.base_url, path.trim_start_matches('/'));
    Ok(Url::parse(&url)?)
  }

  /// Issue a request against `path`.
  ///
  /// GET sends `params` as the query string. With `all`, pages are fetched
  /// one after another until the server stops sending `x-next-page`, and the
  /// arrays are concatenated. POST and PUT send `params` as a JSON body; a
  /// POST answered with 304 yields `null`.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    params: &FilterParams,
    all: bool,
  ) -> Result<Value, ApiError> {
    if method == Method::GET {
      return self.get_pages(path, params, all).await;
    }

    let url = self.endpoint(path)?;
    debug!(%method, %url, "send request");
    let body = serde_json::to_vec(&params.to_json_body())?;
    let response = self
      .http
      .request(method.clone(), url)
      .header(TOKEN_HEADER, &self.token)
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await?;

    let status = response.status();
    debug!(status = status.as_u16(), "response");
    if method == Method::POST && status == StatusCode::NOT_MODIFIED {
      return Ok(Value::Null);
    }
    read_json(response).await
  }

  pub async fn get(&self, path: &str, params: &FilterParams, all: bool) -> Result<Value, ApiError> {
    self.request(Method::GET, path, params, all).await
  }

  pub async fn post(&self, path: &str, params: &FilterParams) -> Result<Value, ApiError> {
    self.request(Method::POST, path, params, false).await
  }

  pub async fn put(&self, path: &str, params: &FilterParams) -> Result<Value, ApiError> {
    self.request(Method::PUT, path, params, false).await
  }

  async fn get_pages(&self, path: &str, params: &FilterParams, all: bool) -> Result<Value, ApiError> {
    let per_page = if all { PER_PAGE_ALL } else { PER_PAGE };
    let mut items = Vec::new();
    let mut page = 1u32;

    loop {
      let (json, next_page) = self.get_page(path, params, per_page, page).await?;
      if !all {
        return Ok(json);
      }

      match json {
        Value::Array(batch) => items.extend(batch),
        // A single resource, nothing to stitch
        other if page == 1 => return Ok(other),
        _ => {
          return Err(ApiError::Decode(format!(
            "page {} of {} is not a list",
            page, path
          )))
        }
      }

      match next_page {
        Some(next) if next > page => page = next,
        _ => break,
      }
    }

    Ok(Value::Array(items))
  }

  async fn get_page(
    &self,
    path: &str,
    params: &FilterParams,
    per_page: u32,
    page: u32,
  ) -> Result<(Value, Option<u32>), ApiError> {
    let mut url = self.endpoint(path)?;
    {
      let mut query = url.query_pairs_mut();
      for (key, value) in params.to_query_pairs() {
        query.append_pair(&key, &value);
      }
      query.append_pair("per_page", &per_page.to_string());
      query.append_pair("page", &page.to_string());
    }

    debug!(%url, "send GET request");
    let response = self
      .http
      .get(url)
      .header(TOKEN_HEADER, &self.token)
      .header(CONTENT_TYPE, "application/json")
      .send()
      .await?;
    debug!(status = response.status().as_u16(), "response");

    let next_page = response
      .headers()
      .get(NEXT_PAGE_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .and_then(|v| v.parse::<u32>().ok());

    Ok((read_json(response).await?, next_page))
  }

  /// Stream `url` into `destination`, returning the destination path.
  pub async fn download_file(&self, url: &str, destination: &Path) -> Result<PathBuf, ApiError> {
    debug!(url, "download");
    let mut response = self
      .http
      .get(url)
      .header(TOKEN_HEADER, &self.token)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(ApiError::Download(format!("unexpected response {}", status)));
    }

    let io_error = |e: std::io::Error| ApiError::Download(format!("{}: {}", destination.display(), e));
    if let Some(parent) = destination.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let mut file = tokio::fs::File::create(destination).await.map_err(io_error)?;

    let streamed = async {
      let mut written = 0usize;
      while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len();
      }
      file.flush().await.map_err(io_error)?;
      Ok::<_, ApiError>(written)
    }
    .await;
    drop(file);

    // Never leave a truncated or empty file behind
    let written = match streamed {
      Ok(0) => Err(ApiError::Download(format!("empty response body from {}", url))),
      other => other,
    };
    let written = match written {
      Ok(written) => written,
      Err(e) => {
        let _ = tokio::fs::remove_file(destination).await;
        return Err(e);
      }
    };

    debug!(url, path = %destination.display(), bytes = written, "download written");
    Ok(destination.to_path_buf())
  }
}

/// Check the status and parse the body. An empty success body is `null`.
async fn read_json(response: Response) -> Result<Value, ApiError> {
  let status = response.status();
  let body = response.bytes().await?;
  if let Some(error) = error_for_status(status, &body) {
    debug!(status = status.as_u16(), %error, "request failed");
    return Err(error);
  }
  if body.is_empty() {
    return Ok(Value::Null);
  }
  Ok(serde_json::from_slice(&body)?)
}
