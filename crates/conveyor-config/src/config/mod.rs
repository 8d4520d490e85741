//! Configuration management for conveyor
//!
//! Hierarchical configuration with discovery and precedence CLI > file >
//! defaults. Every effective value carries the [`ConfigSource`] it came from.

mod builder;
mod discovery;
mod model;
mod validation;

pub use builder::ConfigBuilder;
pub use discovery::{CONFIG_DIR, CONFIG_ENV_VAR, CONFIG_FILE};
pub use model::*;
pub use conveyor_utils::types::ConfigSource;

use conveyor_phase_api::PhaseSpec;
use conveyor_utils::error::ConfigError;
use conveyor_utils::logging::LogFormat;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line overrides, applied over the file and defaults.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Explicit configuration file; skips discovery
    pub config_path: Option<PathBuf>,
    pub max_concurrent_jobs: Option<usize>,
    pub history_limit: Option<usize>,
    pub phase_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub poll_max_wait_secs: Option<u64>,
    pub log_format: Option<String>,
}

/// Effective timing for one HTTP task producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
    pub query_timeout: Duration,
}

impl Config {
    #[must_use]
    pub fn max_concurrent_jobs(&self) -> usize {
        self.engine
            .max_concurrent_jobs
            .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS)
    }

    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.engine.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }

    #[must_use]
    pub fn default_phase_timeout(&self) -> Duration {
        Duration::from_secs(
            self.engine
                .phase_timeout_secs
                .unwrap_or(DEFAULT_PHASE_TIMEOUT_SECS),
        )
    }

    /// Log format; unknown values were rejected during validation.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        match self.engine.log_format.as_deref() {
            Some("verbose") => LogFormat::Verbose,
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    /// Poll timing for `producer`, applying its overrides over `[poller]`.
    #[must_use]
    pub fn poll_settings(&self, producer: Option<&HttpTaskProducerConfig>) -> PollSettings {
        let interval = producer
            .and_then(|p| p.interval_secs)
            .or(self.poller.interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let max_wait = producer
            .and_then(|p| p.max_wait_secs)
            .or(self.poller.max_wait_secs)
            .unwrap_or(DEFAULT_POLL_MAX_WAIT_SECS);
        let query_timeout = self
            .poller
            .query_timeout_secs
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

        PollSettings {
            interval: Duration::from_secs(interval),
            max_wait: Duration::from_secs(max_wait),
            query_timeout: Duration::from_secs(query_timeout),
        }
    }

    /// Effective timeout of a configured phase.
    #[must_use]
    pub fn phase_timeout(&self, phase: &PhaseConfig) -> Duration {
        phase
            .timeout_secs
            .map_or_else(|| self.default_phase_timeout(), Duration::from_secs)
    }

    /// The configured pipeline as phase specs, in declared order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` if no phases are configured.
    pub fn phase_specs(&self) -> Result<Vec<PhaseSpec>, ConfigError> {
        if self.pipeline.phases.is_empty() {
            return Err(ConfigError::MissingRequired("pipeline.phases".to_string()));
        }
        Ok(self
            .pipeline
            .phases
            .iter()
            .map(|phase| {
                PhaseSpec::new(&phase.name, phase.required)
                    .with_producer(phase.producer_name())
                    .with_timeout(self.phase_timeout(phase))
                    .with_weight(phase.weight)
            })
            .collect())
    }

    /// Effective configuration with source attribution, for display.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let poll = self.poll_settings(None);
        let values = [
            ("max_concurrent_jobs", self.max_concurrent_jobs().to_string()),
            ("history_limit", self.history_limit().to_string()),
            (
                "phase_timeout_secs",
                self.default_phase_timeout().as_secs().to_string(),
            ),
            (
                "log_format",
                self.engine
                    .log_format
                    .clone()
                    .unwrap_or_else(|| "compact".to_string()),
            ),
            ("poll_interval_secs", poll.interval.as_secs().to_string()),
            ("poll_max_wait_secs", poll.max_wait.as_secs().to_string()),
            (
                "poll_query_timeout_secs",
                poll.query_timeout.as_secs().to_string(),
            ),
            ("pipeline_phases", self.pipeline.phases.len().to_string()),
            (
                "producers",
                self.producers.keys().cloned().collect::<Vec<_>>().join(","),
            ),
        ];

        values
            .into_iter()
            .map(|(key, value)| {
                let source = self
                    .source_attribution
                    .get(key)
                    .copied()
                    .unwrap_or(ConfigSource::Default);
                (key.to_string(), (value, source.to_string()))
            })
            .collect()
    }
}
