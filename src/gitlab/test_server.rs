//! Minimal in-process HTTP responder for exercising the real client.
//!
//! One request per connection (`Connection: close`), answered by a handler
//! closure. Every request is recorded for assertions.

use reqwest::StatusCode;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
  pub method: String,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub token: Option<String>,
  pub body: String,
}

impl RecordedRequest {
  pub fn query_value(&self, key: &str) -> Option<&str> {
    self
      .query
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  pub fn query_all(&self, key: &str) -> Vec<&str> {
    self
      .query
      .iter()
      .filter(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
      .collect()
  }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
  status: u16,
  headers: Vec<(String, String)>,
  body: String,
  /// Content-Length to announce instead of the real body length
  declared_length: Option<usize>,
}

impl MockResponse {
  pub fn json(status: u16, body: Value) -> Self {
    Self {
      status,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: body.to_string(),
      declared_length: None,
    }
  }

  pub fn raw(status: u16, body: &str) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.to_string(),
      declared_length: None,
    }
  }

  pub fn empty(status: u16) -> Self {
    Self::raw(status, "")
  }

  /// Announce `length` bytes but close the connection after the real body.
  pub fn cut_short(mut self, length: usize) -> Self {
    self.declared_length = Some(length);
    self
  }

  pub fn header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

pub struct TestServer {
  pub base_url: String,
  requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
  pub async fn start<F>(handler: F) -> Self
  where
    F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
  {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler: Handler = Arc::new(handler);

    let log = Arc::clone(&requests);
    tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let handler = Arc::clone(&handler);
        let log = Arc::clone(&log);
        tokio::spawn(async move {
          let _ = serve(stream, handler, log).await;
        });
      }
    });

    Self {
      base_url: format!("http://{}", addr),
      requests,
    }
  }

  /// Requests received so far, in arrival order.
  pub fn requests(&self) -> Vec<RecordedRequest> {
    self.requests.lock().unwrap().clone()
  }
}

async fn serve(
  mut stream: TcpStream,
  handler: Handler,
  log: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];

  let header_end = loop {
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      return Ok(());
    }
    buf.extend_from_slice(&chunk[..n]);
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
      break pos + 4;
    }
  };

  let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
  let mut lines = head.lines();
  let mut request_line = lines.next().unwrap_or_default().split_whitespace();
  let method = request_line.next().unwrap_or_default().to_string();
  let target = request_line.next().unwrap_or("/").to_string();

  let headers: Vec<(String, String)> = lines
    .filter_map(|l| l.split_once(':'))
    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
    .collect();
  let header = |name: &str| {
    headers
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.clone())
  };
  let content_length = header("content-length")
    .and_then(|v| v.parse::<usize>().ok())
    .unwrap_or(0);

  while buf.len() < header_end + content_length {
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      break;
    }
    buf.extend_from_slice(&chunk[..n]);
  }
  let body_end = buf.len().min(header_end + content_length);

  let url = Url::parse(&format!("http://localhost{}", target)).unwrap();
  let request = RecordedRequest {
    method,
    path: url.path().to_string(),
    query: url.query_pairs().into_owned().collect(),
    token: header("private-token"),
    body: String::from_utf8_lossy(&buf[header_end..body_end]).to_string(),
  };

  let response = handler(&request);
  log.lock().unwrap().push(request);

  let reason = StatusCode::from_u16(response.status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("Unknown");
  let mut out = format!(
    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
    response.status,
    reason,
    response.declared_length.unwrap_or(response.body.len())
  );
  for (name, value) in &response.headers {
    out.push_str(&format!("{}: {}\r\n", name, value));
  }
  out.push_str("\r\n");
  out.push_str(&response.body);

  stream.write_all(out.as_bytes()).await?;
  stream.shutdown().await
}
