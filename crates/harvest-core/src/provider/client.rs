use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakers};
use crate::ConfigError;

use super::direct::InProcessProvider;
use super::process::ProcessProvider;
use super::registry::{FallbackStep, ProviderEntry, ProviderPriority, ProviderRegistry, ProviderTransport};
use super::{ProviderError, ProviderEvent, ToolProvider};

const EVENT_CAPACITY: usize = 256;

/// Result of pinging one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderHealth {
    Healthy,
    Unhealthy,
    Disabled,
}

/// Routes `(provider, method, params)` calls to lazily started providers and
/// resolves fallback chains.
///
/// One process is kept per provider name and shared by every caller. A crashed
/// process is dropped and respawned on the next call, unless its circuit
/// breaker has opened after repeated failures.
pub struct ToolProviderClient {
    registry: ProviderRegistry,
    processes: tokio::sync::Mutex<HashMap<String, Arc<ProcessProvider>>>,
    direct: Arc<InProcessProvider>,
    breakers: CircuitBreakers,
    events: broadcast::Sender<ProviderEvent>,
}

impl ToolProviderClient {
    /// Loads the registry at `path` and builds a client around it.
    pub fn initialize(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let registry = ProviderRegistry::load(path)?;
        info!(providers = registry.len(), "provider registry loaded");
        Ok(Self::new(registry))
    }

    pub fn new(registry: ProviderRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            processes: tokio::sync::Mutex::new(HashMap::new()),
            direct: Arc::new(InProcessProvider::from_env()),
            breakers: CircuitBreakers::default(),
            events,
        }
    }

    pub fn with_direct_library(mut self, provider: InProcessProvider) -> Self {
        self.direct = Arc::new(provider);
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = CircuitBreakers::new(config);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Names of providers with a live process.
    pub async fn running(&self) -> Vec<String> {
        let processes = self.processes.lock().await;
        let mut names: Vec<String> = processes
            .iter()
            .filter(|(_, process)| process.is_alive())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Calls `method` on `name`, falling back per the registry.
    ///
    /// Returns `Ok(None)` when a `"none"` fallback skipped the operation.
    pub async fn call(
        &self,
        name: &str,
        method: &str,
        params: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let Some(entry) = self.registry.get(name) else {
            warn!(provider = name, method, "provider is not registered");
            return Err(ProviderError::NoFallbackAvailable {
                provider: name.to_owned(),
            });
        };

        if entry.spec.enabled {
            match self.invoke(entry, method, params.clone()).await {
                Ok(value) => return Ok(Some(value)),
                Err(error) if entry.spec.priority == ProviderPriority::Required => {
                    return Err(error);
                }
                Err(error) => {
                    warn!(provider = name, method, error = %error, "optional provider failed, resolving fallbacks");
                }
            }
        } else {
            debug!(provider = name, method, "provider disabled, resolving fallbacks");
        }

        self.resolve_fallback(entry, method, params).await
    }

    async fn resolve_fallback(
        &self,
        entry: &ProviderEntry,
        method: &str,
        params: Value,
    ) -> Result<Option<Value>, ProviderError> {
        for step in &entry.fallback_chain {
            let outcome = match step {
                FallbackStep::Skip => {
                    info!(provider = %entry.name, method, "fallback chain skipped the operation");
                    return Ok(None);
                }
                FallbackStep::DirectLibrary => {
                    self.direct
                        .call_for(method, params.clone(), entry.spec.config.api_key_env.as_deref())
                        .await
                }
                FallbackStep::Provider(target) => match self.registry.get(target) {
                    Some(target) => self.invoke(target, method, params.clone()).await,
                    None => continue,
                },
            };
            match outcome {
                Ok(value) => return Ok(Some(value)),
                Err(error) => {
                    warn!(provider = %entry.name, method, error = %error, "fallback failed, trying next");
                }
            }
        }

        Err(ProviderError::NoFallbackAvailable {
            provider: entry.name.clone(),
        })
    }

    /// Calls one provider without any fallback.
    async fn invoke(
        &self,
        entry: &ProviderEntry,
        method: &str,
        params: Value,
    ) -> Result<Value, ProviderError> {
        match entry.spec.transport {
            ProviderTransport::InProcess => {
                self.direct
                    .call_for(method, params, entry.spec.config.api_key_env.as_deref())
                    .await
            }
            ProviderTransport::Process => {
                let process = self.process_for(entry).await?;
                let result = process.call(method, params).await;
                match &result {
                    Ok(_) => self.breakers.record_success(&entry.name),
                    Err(error) if error.is_process_failure() => self.breakers.record_failure(&entry.name),
                    Err(_) => {}
                }
                result
            }
        }
    }

    async fn process_for(&self, entry: &ProviderEntry) -> Result<Arc<ProcessProvider>, ProviderError> {
        let mut processes = self.processes.lock().await;
        if let Some(process) = processes.get(&entry.name) {
            if process.is_alive() {
                return Ok(Arc::clone(process));
            }
            debug!(provider = %entry.name, "dropping exited provider process");
            if let Some(process) = processes.remove(&entry.name) {
                process.terminate().await;
            }
        }

        if let Err(remaining) = self.breakers.admit(&entry.name) {
            return Err(ProviderError::process(
                &entry.name,
                format!(
                    "circuit open after repeated failures, retry in {}s",
                    remaining.as_secs().max(1)
                ),
            ));
        }
        match ProcessProvider::spawn(&entry.name, &entry.spec, self.events.clone()) {
            Ok(process) => {
                let process = Arc::new(process);
                processes.insert(entry.name.clone(), Arc::clone(&process));
                Ok(process)
            }
            Err(error) => {
                self.breakers.record_failure(&entry.name);
                warn!(provider = %entry.name, error = %error, "provider failed to start");
                Err(error)
            }
        }
    }

    /// Pings every enabled provider. Never fails; failures map to `unhealthy`.
    pub async fn health_check(&self) -> BTreeMap<String, ProviderHealth> {
        let mut report = BTreeMap::new();
        for entry in self.registry.entries() {
            let health = if !entry.spec.enabled {
                ProviderHealth::Disabled
            } else {
                let ping = match entry.spec.transport {
                    ProviderTransport::InProcess => self.direct.ping().await,
                    ProviderTransport::Process => match self.process_for(entry).await {
                        Ok(process) => process.ping().await,
                        Err(error) => Err(error),
                    },
                };
                match ping {
                    Ok(_) => ProviderHealth::Healthy,
                    Err(error) => {
                        debug!(provider = %entry.name, error = %error, "health check failed");
                        ProviderHealth::Unhealthy
                    }
                }
            };
            report.insert(entry.name.clone(), health);
        }
        report
    }

    /// Terminates every tracked process. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        let drained: Vec<(String, Arc<ProcessProvider>)> =
            self.processes.lock().await.drain().collect();
        for (name, process) in drained {
            debug!(provider = %name, "terminating provider");
            process.terminate().await;
        }
    }

    /// Runs [`cleanup`](Self::cleanup) when the process receives Ctrl-C.
    ///
    /// The handle completes only after an interrupt has been handled, so callers
    /// can race it against their own work to stop early.
    pub fn install_signal_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, stopping providers");
                    client.cleanup().await;
                }
                Err(error) => {
                    warn!(error = %error, "cannot listen for interrupts");
                    std::future::pending::<()>().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::provider::registry::ProviderSpec;
    use crate::NoopHttpClient;

    fn client(entries: Vec<(&str, ProviderSpec)>) -> ToolProviderClient {
        let specs: BTreeMap<String, ProviderSpec> = entries
            .into_iter()
            .map(|(name, spec)| (name.to_owned(), spec))
            .collect();
        ToolProviderClient::new(ProviderRegistry::from_specs(specs).expect("valid registry"))
            .with_direct_library(InProcessProvider::new(Arc::new(NoopHttpClient)))
    }

    #[tokio::test]
    async fn disabled_provider_with_none_fallback_returns_nothing() {
        let client = client(vec![(
            "apify",
            ProviderSpec::process(["apify-mcp"]).disabled().with_fallback(["none"]),
        )]);

        let result = client.call("apify", "runActor", json!({})).await;

        assert_eq!(result, Ok(None));
        assert!(client.running().await.is_empty());
    }

    #[tokio::test]
    async fn unregistered_provider_has_no_fallback() {
        let client = client(Vec::new());

        let error = client.call("ghost", "ping", json!({})).await.expect_err("fails");

        assert_eq!(
            error,
            ProviderError::NoFallbackAvailable {
                provider: String::from("ghost")
            }
        );
    }

    #[tokio::test]
    async fn disabled_provider_falls_back_to_direct_library() {
        let client = client(vec![(
            "fetcher",
            ProviderSpec::process(["fetcher"]).disabled().with_fallback(["direct_library"]),
        )]);

        let result = client
            .call("fetcher", "ping", json!({}))
            .await
            .expect("direct library answers");

        assert_eq!(result.and_then(|value| value.get("pong").cloned()), Some(json!(true)));
    }

    #[tokio::test]
    async fn health_check_reports_disabled_and_in_process_providers() {
        let client = client(vec![
            ("off", ProviderSpec::process(["off"]).disabled()),
            ("local", ProviderSpec::in_process()),
        ]);

        let first = client.health_check().await;
        let second = client.health_check().await;

        assert_eq!(first.get("off"), Some(&ProviderHealth::Disabled));
        assert_eq!(first.get("local"), Some(&ProviderHealth::Healthy));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cleanup_without_processes_is_a_no_op() {
        let client = client(Vec::new());

        client.cleanup().await;
        client.cleanup().await;

        assert!(client.running().await.is_empty());
    }
}
