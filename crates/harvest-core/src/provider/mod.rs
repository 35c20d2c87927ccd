//! # Tool Providers
//!
//! External tool providers reached over line-delimited JSON on stdio, plus an
//! in-process library, behind one [`ToolProviderClient`].
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`registry`] | Registry document, validation and fallback chains |
//! | [`protocol`] | Request/response framing |
//! | [`process`] | Child-process transport |
//! | [`direct`] | In-process `direct_library` provider |
//! | [`client`] | Lifecycle, call routing and fallback resolution |

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod client;
pub mod direct;
mod error;
pub mod process;
pub mod protocol;
pub mod registry;

pub use client::{ProviderHealth, ToolProviderClient};
pub use direct::{InProcessProvider, DIRECT_LIBRARY};
pub use error::ProviderError;
pub use process::ProcessProvider;
pub use registry::{
    CommandSpec, FallbackStep, ProviderEntry, ProviderPriority, ProviderRegistry,
    ProviderSettings, ProviderSpec, ProviderTransport,
};

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Something that answers `(method, params)` calls.
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    fn call<'a>(&'a self, method: &'a str, params: Value) -> ProviderFuture<'a, Value>;

    fn ping<'a>(&'a self) -> ProviderFuture<'a, Value> {
        self.call("ping", Value::Object(Default::default()))
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// Lifecycle notifications published by the provider client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProviderEvent {
    Started { provider: String, pid: Option<u32> },
    /// A non-response line on stdout or any stderr line.
    Diagnostic { provider: String, line: String },
    Exited { provider: String, code: Option<i32> },
    SpawnFailed { provider: String, message: String },
}
