//! In-process provider used for `direct_library` fallbacks and in-process
//! registry entries.
//!
//! Supported methods:
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `ping` | none | `{"pong": true}` |
//! | `fetchUrl` | `{url}` | `{status, body}` |
//! | `runActor` | `{actorId, input, options: {timeout}}` | `{items: [...]}` via the Apify REST API |

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http_client::{HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use super::{ProviderError, ProviderFuture, ToolProvider};

pub const DIRECT_LIBRARY: &str = "direct_library";
const APIFY_BASE_URL: &str = "https://api.apify.com/v2";
const DEFAULT_ACTOR_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    status: String,
    #[serde(default)]
    default_dataset_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ActorOptions {
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunActorParams {
    actor_id: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    options: ActorOptions,
}

/// Provider implemented inside this process on top of an [`HttpClient`].
pub struct InProcessProvider {
    name: String,
    http: Arc<dyn HttpClient>,
    apify_token: Option<String>,
    apify_base_url: String,
}

impl InProcessProvider {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            name: DIRECT_LIBRARY.to_owned(),
            http,
            apify_token: None,
            apify_base_url: APIFY_BASE_URL.to_owned(),
        }
    }

    /// Reqwest-backed provider reading `APIFY_TOKEN` from the environment.
    ///
    /// Registry entries routed here may name their own key variable; see
    /// [`call_for`](Self::call_for).
    pub fn from_env() -> Self {
        let token = std::env::var("APIFY_TOKEN").ok().filter(|token| !token.is_empty());
        Self::new(Arc::new(ReqwestHttpClient::new())).with_apify_token(token)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_apify_token(mut self, token: Option<String>) -> Self {
        self.apify_token = token;
        self
    }

    pub fn with_apify_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.apify_base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn supports(method: &str) -> bool {
        matches!(method, "ping" | "fetchUrl" | "runActor")
    }

    async fn fetch_url(&self, params: Value) -> Result<Value, ProviderError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::remote(&self.name, "fetchUrl", "missing 'url' parameter"))?;
        let response = self
            .http
            .execute(HttpRequest::get(url))
            .await
            .map_err(|error| ProviderError::remote(&self.name, "fetchUrl", error.to_string()))?;
        Ok(json!({ "status": response.status, "body": response.text() }))
    }

    /// Token from `key_env` when it is set, else the provider-wide `APIFY_TOKEN`.
    fn resolve_apify_token(&self, key_env: Option<&str>) -> Option<String> {
        key_env
            .and_then(|name| std::env::var(name).ok())
            .filter(|token| !token.is_empty())
            .or_else(|| self.apify_token.clone())
    }

    async fn run_actor(&self, params: Value, key_env: Option<&str>) -> Result<Value, ProviderError> {
        let fail = |message: String| ProviderError::remote(&self.name, "runActor", message);
        let params: RunActorParams = serde_json::from_value(params)
            .map_err(|error| fail(format!("invalid parameters: {error}")))?;
        let Some(token) = self.resolve_apify_token(key_env) else {
            let message = match key_env {
                Some(name) if name != "APIFY_TOKEN" => format!("neither {name} nor APIFY_TOKEN is set"),
                _ => String::from("APIFY_TOKEN is not set"),
            };
            return Err(fail(message));
        };
        let auth = HttpAuth::BearerToken(token);
        let timeout_secs = params.options.timeout.unwrap_or(DEFAULT_ACTOR_TIMEOUT_SECS);
        let actor_path = params.actor_id.replace('/', "~");

        info!(actor = %params.actor_id, timeout_secs, "starting actor run");
        let start = HttpRequest::post(format!("{}/acts/{actor_path}/runs", self.apify_base_url))
            .with_query("timeout", timeout_secs.to_string())
            .with_auth(&auth)
            .with_json(&params.input);
        let response = self.http.execute(start).await.map_err(|error| fail(error.to_string()))?;
        if !response.is_success() {
            return Err(fail(format!("run start returned {}: {}", response.status, response.text())));
        }
        let mut run = response
            .json::<ApiEnvelope<RunData>>()
            .map_err(|error| fail(error.to_string()))?
            .data;

        let run_id = run.id.clone();
        let poll = async {
            loop {
                match run.status.as_str() {
                    "SUCCEEDED" => return Ok(()),
                    "FAILED" | "ABORTED" | "TIMED-OUT" => {
                        return Err(fail(format!("actor run {} ended with {}", run.id, run.status)));
                    }
                    _ => debug!(run_id = %run.id, status = %run.status, "actor run in progress"),
                }
                let request = HttpRequest::get(format!("{}/actor-runs/{}", self.apify_base_url, run.id))
                    .with_query("waitForFinish", "60")
                    .with_auth(&auth)
                    .with_timeout_ms(90_000);
                let response = self.http.execute(request).await.map_err(|error| fail(error.to_string()))?;
                if !response.is_success() {
                    return Err(fail(format!("run poll returned {}", response.status)));
                }
                run = response
                    .json::<ApiEnvelope<RunData>>()
                    .map_err(|error| fail(error.to_string()))?
                    .data;
            }
        };
        tokio::time::timeout(Duration::from_secs(timeout_secs), poll)
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: self.name.clone(),
                method: String::from("runActor"),
                timeout_ms: timeout_secs * 1000,
            })??;

        let Some(dataset_id) = run.default_dataset_id.as_deref() else {
            return Ok(json!({ "items": [] }));
        };
        let request = HttpRequest::get(format!("{}/datasets/{dataset_id}/items", self.apify_base_url))
            .with_query("format", "json")
            .with_auth(&auth);
        let response = self.http.execute(request).await.map_err(|error| fail(error.to_string()))?;
        if !response.is_success() {
            return Err(fail(format!("dataset fetch returned {}", response.status)));
        }
        let items: Vec<Value> = response.json().map_err(|error| fail(error.to_string()))?;
        info!(run_id = %run_id, count = items.len(), "actor run completed");
        Ok(json!({ "items": items }))
    }
}

impl InProcessProvider {
    /// Calls `method` on behalf of a registry entry whose credentials live in
    /// the `key_env` environment variable.
    pub fn call_for<'a>(
        &'a self,
        method: &'a str,
        params: Value,
        key_env: Option<&'a str>,
    ) -> ProviderFuture<'a, Value> {
        Box::pin(async move {
            match method {
                "ping" => Ok(json!({ "pong": true, "provider": self.name })),
                "fetchUrl" => self.fetch_url(params).await,
                "runActor" => self.run_actor(params, key_env).await,
                other => Err(ProviderError::UnsupportedMethod {
                    provider: self.name.clone(),
                    method: other.to_owned(),
                }),
            }
        })
    }
}

impl ToolProvider for InProcessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(&'a self, method: &'a str, params: Value) -> ProviderFuture<'a, Value> {
        self.call_for(method, params, None)
    }
}
