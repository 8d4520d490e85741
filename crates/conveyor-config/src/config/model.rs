use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::ConfigSource;

/// Default number of jobs allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Default number of finished jobs kept for history queries
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Default phase timeout in seconds (10 minutes)
pub const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 600;

/// Default delay between task status queries in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default ceiling on polling one task in seconds
pub const DEFAULT_POLL_MAX_WAIT_SECS: u64 = 120;

/// Default bound on a single status query in seconds
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub poller: PollerConfig,
    pub pipeline: PipelineConfig,
    pub producers: BTreeMap<String, ProducerConfig>,
    /// Where each effective value came from
    pub source_attribution: BTreeMap<String, ConfigSource>,
    /// File the configuration was loaded from, if any
    pub config_file: Option<PathBuf>,
}

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub max_concurrent_jobs: Option<usize>,
    pub history_limit: Option<usize>,
    /// Timeout for phases that do not set their own
    pub phase_timeout_secs: Option<u64>,
    /// `compact`, `verbose` or `json`
    pub log_format: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: Some(DEFAULT_MAX_CONCURRENT_JOBS),
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
            phase_timeout_secs: Some(DEFAULT_PHASE_TIMEOUT_SECS),
            log_format: Some("compact".to_string()),
        }
    }
}

/// `[poller]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PollerConfig {
    pub interval_secs: Option<u64>,
    pub max_wait_secs: Option<u64>,
    pub query_timeout_secs: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(DEFAULT_POLL_INTERVAL_SECS),
            max_wait_secs: Some(DEFAULT_POLL_MAX_WAIT_SECS),
            query_timeout_secs: Some(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

/// `[pipeline]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

/// One `[[pipeline.phases]]` entry
///
/// ```toml
/// [[pipeline.phases]]
/// name = "funding"
/// producer = "funding-lookup"
/// required = false
/// timeout_secs = 300
/// weight = 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    pub name: String,
    /// Producer key; defaults to `name`
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub weight: u8,
}

fn default_required() -> bool {
    true
}

impl PhaseConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            producer: None,
            required,
            timeout_secs: None,
            weight: 0,
        }
    }

    /// Producer key, falling back to the phase name.
    #[must_use]
    pub fn producer_name(&self) -> &str {
        self.producer.as_deref().unwrap_or(&self.name)
    }
}

/// A `[producers.<name>]` entry, selected by `kind`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerConfig {
    /// Run a subprocess per phase
    Command(CommandProducerConfig),
    /// Submit a task to an HTTP provider and poll it
    HttpTask(HttpTaskProducerConfig),
}

impl ProducerConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::HttpTask(_) => "http_task",
        }
    }
}

/// ```toml
/// [producers.research]
/// kind = "command"
/// program = "python3"
/// args = ["execution/research_company.py", "--json"]
/// env = { RESEARCH_DEPTH = "2" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommandProducerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// ```toml
/// [producers.illustrate]
/// kind = "http_task"
/// model = "google/imagen4"
/// api_key_env = "KEI_AI_API_KEY"
/// input = { prompt = "Infographic about {subject}", aspect_ratio = "1:1" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpTaskProducerConfig {
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub submit_timeout_secs: Option<u64>,
    /// Task input template; `{subject}`, `{phase}`, `{job_id}` and
    /// `{attr.<key>}` in string values are filled from the phase context
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    /// Overrides `[poller].interval_secs` for this producer
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Overrides `[poller].max_wait_secs` for this producer
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}
