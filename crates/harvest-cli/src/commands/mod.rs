mod collect;
mod cost;
mod providers;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use harvest_core::{HarvestConfig, HttpClient, ProviderRegistry, ReqwestHttpClient, ToolProviderClient};
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Shared state built once per invocation.
pub struct Context {
    pub config: HarvestConfig,
    pub providers: Arc<ToolProviderClient>,
    pub http: Arc<dyn HttpClient>,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        let config = match &cli.rules {
            Some(path) => HarvestConfig::load(path)?,
            None => HarvestConfig::default(),
        };
        let registry = load_registry(&cli.providers)?;
        Ok(Self {
            config,
            providers: Arc::new(ToolProviderClient::new(registry)),
            http: Arc::new(ReqwestHttpClient::new()),
        })
    }
}

/// A missing registry file means "no providers"; a broken one is an error.
fn load_registry(path: &Path) -> Result<ProviderRegistry, CliError> {
    if !path.exists() {
        warn!(path = %path.display(), "provider registry not found, running without tool providers");
        return Ok(ProviderRegistry::from_specs(Default::default())?);
    }
    let registry = ProviderRegistry::load(path)?;
    info!(path = %path.display(), providers = registry.len(), "provider registry loaded");
    Ok(registry)
}

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    if let Command::Cost(args) = &cli.command {
        let config = match &cli.rules {
            Some(path) => HarvestConfig::load(path)?,
            None => HarvestConfig::default(),
        };
        return cost::run(args, &config);
    }

    let context = Context::load(cli)?;
    let mut interrupt = context.providers.install_signal_cleanup();
    let result = until_interrupted(execute(cli, &context), &mut interrupt).await;
    context.providers.cleanup().await;
    interrupt.abort();
    result
}

async fn execute(cli: &Cli, context: &Context) -> Result<Value, CliError> {
    match &cli.command {
        Command::Collect(args) => collect::run(args, context).await,
        Command::Providers(args) => providers::run(args, context).await,
        Command::Cost(args) => cost::run(args, &context.config),
    }
}

/// Drops `command` as soon as `interrupt` completes.
async fn until_interrupted<C, I>(command: C, interrupt: I) -> Result<Value, CliError>
where
    C: Future<Output = Result<Value, CliError>>,
    I: Future,
{
    tokio::select! {
        result = command => result,
        _ = interrupt => {
            warn!("command interrupted");
            Err(CliError::Interrupted)
        }
    }
}
