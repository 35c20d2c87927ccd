use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

/// Boxed future returned by every transport call.
pub type HttpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, HttpError>> + Send + 'a>>;

/// Minimal HTTP method set needed by strategies and the transcription service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                headers.insert(String::from("authorization"), format!("Basic {encoded}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// HTTP request envelope used by transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        self.with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(encoded)
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// URL with the query pairs percent-encoded and appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let pairs = self
            .query
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{pairs}", self.url)
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body.into()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|error| {
            HttpError::non_retryable(format!("invalid JSON body: {error}"))
        })
    }
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    retryable: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Error for an unexpected status code; 408, 429 and 5xx are retryable.
    pub fn status(status: u16) -> Self {
        let retryable = status == 408 || status == 429 || status >= 500;
        Self {
            message: format!("unexpected HTTP status {status}"),
            retryable,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Bytes moved so far in an upload or download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `[0, 1]`, when the total size is known.
    pub fn fraction(self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Callback receiving transfer progress.
pub type ProgressFn<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

/// Temporary sibling path used while a download is in flight.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Transport contract used by strategies and the transcription service.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse>;

    /// Streams the response body to `dest`, reporting progress as bytes arrive.
    ///
    /// The body is written to `<dest>.tmp` and renamed on success; the partial
    /// file is removed on failure. Returns the number of bytes written.
    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
        progress: ProgressFn<'a>,
    ) -> HttpFuture<'a, u64> {
        Box::pin(async move {
            let response = self.execute(request).await?;
            if !response.is_success() {
                return Err(HttpError::status(response.status));
            }
            let partial = partial_path(dest);
            let written = response.body.len() as u64;
            if let Err(error) = tokio::fs::write(&partial, &response.body).await {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(HttpError::non_retryable(format!(
                    "failed to write '{}': {error}",
                    partial.display()
                )));
            }
            tokio::fs::rename(&partial, dest).await.map_err(|error| {
                HttpError::non_retryable(format!("failed to finalize '{}': {error}", dest.display()))
            })?;
            progress(TransferProgress {
                transferred: written,
                total: Some(written),
            });
            Ok(written)
        })
    }
}

impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse> {
        (**self).execute(request)
    }

    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
        progress: ProgressFn<'a>,
    ) -> HttpFuture<'a, u64> {
        (**self).download(request, dest, progress)
    }
}

/// Offline transport that answers every request with an empty JSON object.
#[derive(Debug, Default)]
pub struct NoopHttpClient;

impl HttpClient for NoopHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse> {
        let _ = request;
        Box::pin(async move { Ok(HttpResponse::ok_json("{}")) })
    }
}

/// Production HTTP client backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("harvest/", env!("CARGO_PKG_VERSION")))
                    .cookie_store(true)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    fn builder(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let url = request.full_url();
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = builder.timeout(std::time::Duration::from_millis(request.timeout_ms));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn map_send_error(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::new(format!("request timeout: {error}"))
    } else if error.is_connect() {
        HttpError::new(format!("connection failed: {error}"))
    } else {
        HttpError::new(format!("request failed: {error}"))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a, HttpResponse> {
        Box::pin(async move {
            let response = self.builder(&request).send().await.map_err(map_send_error)?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_owned(), value.to_owned()))
                })
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| HttpError::new(format!("failed to read response body: {e}")))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }

    fn download<'a>(
        &'a self,
        request: HttpRequest,
        dest: &'a Path,
        progress: ProgressFn<'a>,
    ) -> HttpFuture<'a, u64> {
        Box::pin(async move {
            let mut response = self.builder(&request).send().await.map_err(map_send_error)?;
            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                return Err(HttpError::status(status));
            }
            let total = response.content_length();
            let partial = partial_path(dest);

            let result: Result<u64, HttpError> = async {
                let mut file = tokio::fs::File::create(&partial).await.map_err(|error| {
                    HttpError::non_retryable(format!(
                        "failed to create '{}': {error}",
                        partial.display()
                    ))
                })?;
                let mut transferred = 0_u64;
                while let Some(chunk) = response
                    .chunk()
                    .await
                    .map_err(|e| HttpError::new(format!("download interrupted: {e}")))?
                {
                    file.write_all(&chunk).await.map_err(|error| {
                        HttpError::non_retryable(format!("failed to write chunk: {error}"))
                    })?;
                    transferred += chunk.len() as u64;
                    progress(TransferProgress { transferred, total });
                }
                file.flush().await.map_err(|error| {
                    HttpError::non_retryable(format!("failed to flush download: {error}"))
                })?;
                Ok(transferred)
            }
            .await;

            match result {
                Ok(transferred) => {
                    tokio::fs::rename(&partial, dest).await.map_err(|error| {
                        HttpError::non_retryable(format!(
                            "failed to finalize '{}': {error}",
                            dest.display()
                        ))
                    })?;
                    Ok(transferred)
                }
                Err(error) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    Err(error)
                }
            }
        })
    }
}
