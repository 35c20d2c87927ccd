//! Provider registry loading, validation and fallback chain resolution.
//!
//! A registry document maps provider names to [`ProviderSpec`]s:
//!
//! ```json
//! {
//!   "providers": {
//!     "apify": {
//!       "command": "node apify-server.js",
//!       "priority": "optional",
//!       "fallback": ["direct_library"],
//!       "config": { "timeout": 300, "api_key_env": "APIFY_TOKEN" }
//!     }
//!   }
//! }
//! ```
//!
//! Fallback chains are validated and flattened once at load: unknown targets
//! and cycles are configuration errors, disabled targets are dropped, and an
//! optional target contributes its own fallbacks after itself.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Reserved fallback target meaning "give up and return nothing".
pub const FALLBACK_NONE: &str = "none";
/// Reserved fallback target for the in-process library.
pub const FALLBACK_DIRECT_LIBRARY: &str = "direct_library";

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Whether failures of a provider propagate or fall back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPriority {
    Required,
    #[default]
    Optional,
}

/// How calls reach a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTransport {
    #[default]
    Process,
    InProcess,
}

/// Launch command, either a shell-like string or an argv array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(str::to_owned).collect(),
            Self::Argv(argv) => argv.clone(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Per-provider runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Environment variable holding the provider's API key.
    #[serde(default, alias = "apiKeyEnv")]
    pub api_key_env: Option<String>,
    /// Extra environment for the spawned process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            api_key_env: None,
            env: BTreeMap::new(),
        }
    }
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

fn default_enabled() -> bool {
    true
}

/// Static configuration of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Option<CommandSpec>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub transport: ProviderTransport,
    #[serde(default)]
    pub priority: ProviderPriority,
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub config: ProviderSettings,
}

impl ProviderSpec {
    /// Process provider launched with `argv`.
    pub fn process<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            command: Some(CommandSpec::Argv(argv.into_iter().map(Into::into).collect())),
            args: Vec::new(),
            transport: ProviderTransport::Process,
            priority: ProviderPriority::Optional,
            fallback: Vec::new(),
            config: ProviderSettings::default(),
        }
    }

    pub fn in_process() -> Self {
        Self {
            command: None,
            transport: ProviderTransport::InProcess,
            ..Self::process(Vec::<String>::new())
        }
    }

    pub fn required(mut self) -> Self {
        self.priority = ProviderPriority::Required;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_fallback<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.timeout = seconds;
        self
    }

    /// Full argv: command words followed by `args`.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self
            .command
            .as_ref()
            .map(CommandSpec::argv)
            .unwrap_or_default();
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// One resolved step of a provider's fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackStep {
    /// Stop and return no result.
    Skip,
    /// Invoke the in-process library with the same method.
    DirectLibrary,
    /// Invoke another enabled provider directly.
    Provider(String),
}

/// Registered provider with its pre-resolved fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub name: String,
    pub spec: ProviderSpec,
    pub fallback_chain: Vec<FallbackStep>,
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[serde(default, alias = "mcps", alias = "servers")]
    providers: BTreeMap<String, ProviderSpec>,
}

/// Validated set of providers, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Loads a registry from JSON or TOML, chosen by file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: RegistryDocument = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?,
            _ => serde_json::from_str(&raw).map_err(|error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?,
        };
        Self::from_specs(document.providers)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let document: RegistryDocument =
            serde_json::from_str(raw).map_err(|error| ConfigError::Parse {
                path: "<inline>".into(),
                message: error.to_string(),
            })?;
        Self::from_specs(document.providers)
    }

    pub fn from_specs(specs: BTreeMap<String, ProviderSpec>) -> Result<Self, ConfigError> {
        for (name, spec) in &specs {
            if name == FALLBACK_NONE || name == FALLBACK_DIRECT_LIBRARY {
                return Err(ConfigError::InvalidProvider {
                    provider: name.clone(),
                    message: String::from("name is reserved for fallback targets"),
                });
            }
            if spec.enabled
                && spec.transport == ProviderTransport::Process
                && spec.argv().is_empty()
            {
                return Err(ConfigError::InvalidProvider {
                    provider: name.clone(),
                    message: String::from("process provider needs a command"),
                });
            }
            for target in &spec.fallback {
                let reserved = target == FALLBACK_NONE || target == FALLBACK_DIRECT_LIBRARY;
                if !reserved && !specs.contains_key(target) {
                    return Err(ConfigError::UnknownFallback {
                        provider: name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        detect_cycles(&specs)?;

        let mut entries = BTreeMap::new();
        for (name, spec) in &specs {
            let fallback_chain = resolve_chain(name, &specs);
            entries.insert(
                name.clone(),
                ProviderEntry {
                    name: name.clone(),
                    spec: spec.clone(),
                    fallback_chain,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

fn detect_cycles(specs: &BTreeMap<String, ProviderSpec>) -> Result<(), ConfigError> {
    let mut visits = BTreeMap::new();
    for name in specs.keys() {
        let mut path = Vec::new();
        visit(name, specs, &mut visits, &mut path)?;
    }
    Ok(())
}

fn visit<'a>(
    name: &'a str,
    specs: &'a BTreeMap<String, ProviderSpec>,
    visits: &mut BTreeMap<&'a str, Visit>,
    path: &mut Vec<&'a str>,
) -> Result<(), ConfigError> {
    match visits.get(name) {
        Some(Visit::Done) => return Ok(()),
        Some(Visit::InProgress) => {
            let start = path.iter().position(|step| *step == name).unwrap_or(0);
            let mut chain: Vec<String> = path[start..].iter().map(|step| (*step).to_owned()).collect();
            chain.push(name.to_owned());
            return Err(ConfigError::FallbackCycle { chain });
        }
        None => {}
    }

    visits.insert(name, Visit::InProgress);
    path.push(name);
    if let Some(spec) = specs.get(name) {
        for target in &spec.fallback {
            if let Some((key, _)) = specs.get_key_value(target.as_str()) {
                visit(key, specs, visits, path)?;
            }
        }
    }
    path.pop();
    visits.insert(name, Visit::Done);
    Ok(())
}

fn resolve_chain(name: &str, specs: &BTreeMap<String, ProviderSpec>) -> Vec<FallbackStep> {
    let mut steps = Vec::new();
    let mut expanded = BTreeSet::new();
    expand(name, specs, &mut steps, &mut expanded);
    steps
}

fn expand<'a>(
    name: &'a str,
    specs: &'a BTreeMap<String, ProviderSpec>,
    steps: &mut Vec<FallbackStep>,
    expanded: &mut BTreeSet<&'a str>,
) {
    let Some(spec) = specs.get(name) else {
        return;
    };
    expanded.insert(name);
    for target in &spec.fallback {
        match target.as_str() {
            FALLBACK_NONE => steps.push(FallbackStep::Skip),
            FALLBACK_DIRECT_LIBRARY => steps.push(FallbackStep::DirectLibrary),
            other => {
                let Some((key, target_spec)) = specs.get_key_value(other) else {
                    continue;
                };
                if !target_spec.enabled {
                    continue;
                }
                steps.push(FallbackStep::Provider(key.clone()));
                if target_spec.priority == ProviderPriority::Optional && !expanded.contains(key.as_str()) {
                    expand(key, specs, steps, expanded);
                }
            }
        }
    }
}
