use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{ConfigError, ContentItem, Platform, StrategyKind};

use super::events::EventSink;
use super::source::NormalizedSource;
use super::CollectError;

/// Raw output of one strategy before it is wrapped into an `AcquisitionResult`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acquisition {
    pub items: Vec<ContentItem>,
    pub metadata: Map<String, Value>,
    pub stats: Map<String, Value>,
}

impl Acquisition {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.metadata.insert(key.to_owned(), value);
        }
        self
    }

    pub fn with_stat(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.stats.insert(key.to_owned(), value.into());
        self
    }
}

/// Source metadata gathered before the chain runs.
///
/// `metadata` seeds the result metadata; strategy output wins on key clashes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preparation {
    pub metadata: Map<String, Value>,
    pub warnings: Vec<String>,
}

pub type PrepareFuture<'a> = Pin<Box<dyn Future<Output = Preparation> + Send + 'a>>;

/// Per-call context handed to strategies.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Directory owned by this source; strategies may write scratch files here.
    pub source_dir: PathBuf,
    pub events: EventSink,
}

pub type StrategyFuture<'a> = Pin<Box<dyn Future<Output = Result<Acquisition, CollectError>> + Send + 'a>>;

/// One way of acquiring a source.
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a>;
}

/// Non-empty, duplicate-free strategy order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyChain {
    steps: Vec<StrategyKind>,
}

impl StrategyChain {
    pub fn new(steps: impl IntoIterator<Item = StrategyKind>) -> Result<Self, ConfigError> {
        let mut deduped = Vec::new();
        for step in steps {
            if !deduped.contains(&step) {
                deduped.push(step);
            }
        }
        if deduped.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "strategy chain must contain at least one strategy",
            )));
        }
        Ok(Self { steps: deduped })
    }

    pub fn single(step: StrategyKind) -> Self {
        Self { steps: vec![step] }
    }

    pub fn steps(&self) -> &[StrategyKind] {
        &self.steps
    }
}

/// Strategy implementations keyed by platform and kind.
#[derive(Clone, Default)]
pub struct StrategyTable {
    strategies: HashMap<(Platform, StrategyKind), Arc<dyn Strategy>>,
}

impl StrategyTable {
    pub fn insert(&mut self, platform: Platform, strategy: Arc<dyn Strategy>) {
        self.strategies.insert((platform, strategy.kind()), strategy);
    }

    pub fn get(&self, platform: Platform, kind: StrategyKind) -> Option<&Arc<dyn Strategy>> {
        self.strategies.get(&(platform, kind))
    }
}

/// Winning strategy of a chain run and the warnings raised before it.
#[derive(Debug)]
pub struct ChainOutcome {
    pub method: StrategyKind,
    pub acquisition: Acquisition,
    pub warnings: Vec<String>,
}

/// Runs `chain` strictly in order.
///
/// Failures of non-final strategies become `warning` events; the final
/// strategy's failure is returned as is.
pub async fn run_chain(
    chain: &StrategyChain,
    source: &NormalizedSource,
    ctx: &StrategyContext,
    table: &StrategyTable,
) -> Result<ChainOutcome, CollectError> {
    let steps = chain.steps();
    let mut warnings = Vec::new();
    for (index, kind) in steps.iter().copied().enumerate() {
        let is_final = index + 1 == steps.len();
        let outcome = match table.get(source.platform, kind) {
            Some(strategy) => {
                ctx.events
                    .status("fetch", format!("fetching {} via {kind}", source.platform));
                strategy.fetch(source, ctx).await
            }
            None => Err(CollectError::unavailable(
                kind,
                format!("no {kind} strategy for {}", source.platform),
            )),
        };

        match outcome {
            Ok(acquisition) => {
                info!(source_id = %source.id, method = %kind, items = acquisition.items.len(), "strategy succeeded");
                return Ok(ChainOutcome {
                    method: kind,
                    acquisition,
                    warnings,
                });
            }
            Err(error) if is_final => return Err(error),
            Err(error) => {
                warn!(source_id = %source.id, strategy = %kind, error = %error, "strategy failed, trying next");
                let message = match error {
                    CollectError::StrategyFailed { .. } | CollectError::StrategyUnavailable { .. } => {
                        error.to_string()
                    }
                    _ => format!("{kind} strategy failed: {error}"),
                };
                ctx.events.warning(Some(kind), message.clone());
                warnings.push(message);
            }
        }
    }
    Err(CollectError::EmptyChain)
}
