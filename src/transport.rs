use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ApiError;

/// Receives upload progress as a whole percentage in `[0, 100]`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A plain JSON request against a path relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        ApiRequest {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Single-attempt calls against the scoring service; nothing is retried.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request and parse the JSON response body.
    async fn request(&self, request: ApiRequest) -> Result<Value, ApiError>;

    /// Stream a multipart body, reporting progress, and parse the JSON reply.
    ///
    /// `progress` may never be called if the body length is unknown. Values
    /// are non-decreasing for the lifetime of one upload.
    async fn upload(
        &self,
        path: &str,
        body: MultipartBody,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone, PartialEq)]
enum PartContent {
    Text(String),
    File {
        filename: String,
        content_type: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Part {
    name: String,
    content: PartContent,
}

/// A `multipart/form-data` body assembled in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBody {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        MultipartBody {
            boundary: format!("----fraudscope{:016x}{:04x}", nanos, seq & 0xffff),
            parts: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            content: PartContent::Text(value.into()),
        });
        self
    }

    pub fn file(mut self, name: &str, filename: &str, data: Vec<u8>) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            content: PartContent::File {
                filename: filename.to_string(),
                content_type: "text/csv".to_string(),
                data,
            },
        });
        self
    }

    /// Read a file from disk into a file part named after the path's file name.
    pub fn file_from_path(self, name: &str, path: &Path) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());
        Ok(self.file(name, &filename, data))
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }

    /// Text value of the first part with this name.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|p| match &p.content {
            PartContent::Text(v) if p.name == name => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn has_file(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p.content, PartContent::File { .. }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match &part.content {
                PartContent::Text(value) => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(&part.name)
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(value.as_bytes());
                }
                PartContent::File {
                    filename,
                    content_type,
                    data,
                } => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape_quoted(&part.name),
                            escape_quoted(filename),
                            content_type
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(data);
                }
            }
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        out
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Wraps a body reader, reporting whole-percent progress and aborting the
/// transfer once the token is cancelled.
pub struct ProgressReader<R> {
    inner: R,
    total: u64,
    sent: u64,
    last_reported: Option<u8>,
    on_progress: ProgressFn,
    cancel: CancellationToken,
}

impl<R: Read> ProgressReader<R> {
    /// `total == 0` means the length is unknown and progress is never reported.
    pub fn new(inner: R, total: u64, on_progress: ProgressFn, cancel: CancellationToken) -> Self {
        ProgressReader {
            inner,
            total,
            sent: 0,
            last_reported: None,
            on_progress,
            cancel,
        }
    }

    fn report(&mut self) {
        if self.total == 0 {
            return;
        }
        let pct = ((self.sent * 100 + self.total / 2) / self.total).min(100) as u8;
        if self.last_reported.is_none_or(|last| pct > last) {
            self.last_reported = Some(pct);
            (self.on_progress)(pct);
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("upload cancelled"));
        }
        let read = self.inner.read(buf)?;
        self.sent += read as u64;
        if read > 0 {
            self.report();
        }
        Ok(read)
    }
}

/// Blocking ureq client run on tokio's blocking pool.
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .timeout_write(config.write_timeout)
            .build();
        HttpTransport {
            agent,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let agent = self.agent.clone();
        let url = self.config.url(&request.path);
        tokio::task::spawn_blocking(move || send_blocking(&agent, &url, request))
            .await
            .map_err(|e| ApiError::Network(format!("request worker failed: {e}")))?
    }

    async fn upload(
        &self,
        path: &str,
        body: MultipartBody,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<Value, ApiError> {
        let agent = self.agent.clone();
        let url = self.config.url(path);
        tokio::task::spawn_blocking(move || upload_blocking(&agent, &url, body, progress, cancel))
            .await
            .map_err(|e| ApiError::Upload {
                status: None,
                message: format!("upload worker failed: {e}"),
            })?
    }
}

/// Parse straight from the body stream; responses have no size cap.
fn read_json(response: ureq::Response) -> Result<Value, serde_json::Error> {
    serde_json::from_reader(response.into_reader())
}

fn send_blocking(agent: &ureq::Agent, url: &str, request: ApiRequest) -> Result<Value, ApiError> {
    debug!(method = request.method.as_str(), %url, "request");
    let mut req = agent
        .request(request.method.as_str(), url)
        .set("Content-Type", "application/json");
    for (name, value) in &request.headers {
        req = req.set(name, value);
    }
    let result = match &request.body {
        Some(body) => req.send_string(&body.to_string()),
        None => req.call(),
    };
    match result {
        Ok(response) => read_json(response).map_err(|e| {
            if e.is_io() {
                ApiError::Network(e.to_string())
            } else {
                e.into()
            }
        }),
        Err(ureq::Error::Status(status, response)) => {
            let message = response.into_string().unwrap_or_default();
            debug!(status, %url, "request rejected");
            Err(ApiError::Http { status, message })
        }
        Err(ureq::Error::Transport(transport)) => {
            warn!(%url, error = %transport, "request could not complete");
            Err(ApiError::Network(transport.to_string()))
        }
    }
}

fn upload_blocking(
    agent: &ureq::Agent,
    url: &str,
    body: MultipartBody,
    progress: ProgressFn,
    cancel: CancellationToken,
) -> Result<Value, ApiError> {
    let content_type = body.content_type();
    let bytes = body.encode();
    let total = bytes.len() as u64;
    debug!(%url, bytes = total, "upload");

    let reader = ProgressReader::new(Cursor::new(bytes), total, progress, cancel.clone());
    let result = agent
        .post(url)
        .set("Content-Type", &content_type)
        .set("Content-Length", &total.to_string())
        .send(reader);

    if cancel.is_cancelled() {
        return Err(ApiError::Cancelled);
    }
    match result {
        Ok(response) => read_json(response).map_err(|e| {
            if e.is_io() {
                ApiError::Upload {
                    status: None,
                    message: format!("Network error: {e}"),
                }
            } else {
                e.into()
            }
        }),
        Err(ureq::Error::Status(status, response)) => {
            let text = response.into_string().unwrap_or_default();
            let message = if text.trim().is_empty() {
                "Upload failed".to_string()
            } else {
                text
            };
            Err(ApiError::Upload {
                status: Some(status),
                message,
            })
        }
        Err(ureq::Error::Transport(transport)) => {
            warn!(%url, error = %transport, "upload could not complete");
            Err(ApiError::Upload {
                status: None,
                message: format!("Network error: {transport}"),
            })
        }
    }
}
