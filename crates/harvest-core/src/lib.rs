//! # Harvest Core
//!
//! Multi-provider content acquisition engine.
//!
//! ## Overview
//!
//! - **Tool providers** reached over line-delimited JSON on stdio, or in process,
//!   with registry-driven fallback chains
//! - **Transcription jobs** uploaded, submitted and polled with adaptive backoff,
//!   cooperative cancellation and cost accounting
//! - **Collectors** that run an ordered strategy chain per source, normalize the
//!   winning output, score its quality and persist one artifact
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`collector`] | Source collectors, strategies and rules |
//! | [`circuit_breaker`] | Per-provider circuit breakers |
//! | [`domain`] | Sources, items and acquisition results |
//! | [`error`] | Validation and configuration errors |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`provider`] | Tool provider registry, transports and client |
//! | [`quality`] | Advisory quality scoring |
//! | [`retry`] | Retry policies and adaptive poll intervals |
//! | [`throttling`] | Request budgets for native APIs |
//! | [`transcription`] | Transcription job orchestration |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  CLI / caller    │
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────────────┐
//! │ SourceCollector  │────▶│ Strategy chain           │
//! │ (per content)    │     │ actor → api → scrape     │
//! └────────┬─────────┘     └────┬───────────┬─────────┘
//!          │                    │           │
//!          ▼                    ▼           ▼
//! ┌──────────────────┐  ┌──────────────┐ ┌───────────────────────────┐
//! │ Quality + output │  │ ToolProvider │ │ HttpClient / Transcription │
//! └──────────────────┘  │ Client       │ │ Orchestrator               │
//!                       └──────────────┘ └───────────────────────────┘
//! ```
//!
//! ## Security
//!
//! - API keys come from environment variables and are never logged
//! - Provider subprocesses only receive the key named in their config

pub mod circuit_breaker;
pub mod collector;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod provider;
pub mod quality;
pub mod retry;
pub mod throttling;
pub mod transcription;

// Circuit breaker
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakers, CircuitState};

// Collectors
pub use collector::{
    CollectError, CollectReport, CollectSummary, CollectorEvent, ContentPipeline, HarvestConfig, PdfPipeline,
    PodcastPipeline, SocialCredentials, SocialPipeline, SourceCollector, StrategyChain,
};

// Domain models
pub use domain::{
    AcquisitionMetadata, AcquisitionResult, AcquisitionStats, CollectorOutput, ContentItem, ContentType,
    DiarizationHints, ItemKind, Platform, SourceDescriptor, StrategyKind, UtcDateTime, AUDIO_EXTENSIONS,
};

// Error types
pub use error::{ConfigError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient,
    TransferProgress,
};

// Tool providers
pub use provider::{
    InProcessProvider, ProviderError, ProviderEvent, ProviderHealth, ProviderRegistry, ProviderSpec, ToolProvider,
    ToolProviderClient,
};

// Quality
pub use quality::{QualityReport, QualityThresholds};

// Retry logic
pub use retry::{AdaptiveInterval, Backoff, RetryConfig};

// Throttling
pub use throttling::{ThrottlePolicy, ThrottlingQueue};

// Transcription
pub use transcription::{
    estimate_cost, AudioInput, CostTotals, JobStatus, TranscribeOptions, Transcript, TranscriptionConfig,
    TranscriptionError, TranscriptionEvent, TranscriptionOrchestrator,
};
