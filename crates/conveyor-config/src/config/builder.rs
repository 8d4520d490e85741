use conveyor_utils::error::ConfigError;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{
    Config, ConfigSource, EngineConfig, PhaseConfig, PipelineConfig, PollerConfig, ProducerConfig,
};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding conveyor without environment variables or
    /// config files.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use conveyor_config::{CommandProducerConfig, Config, PhaseConfig, ProducerConfig};
    /// use std::time::Duration;
    ///
    /// let config = Config::builder()
    ///     .max_concurrent_jobs(2)
    ///     .phase_timeout(Duration::from_secs(300))
    ///     .producer(
    ///         "research",
    ///         ProducerConfig::Command(CommandProducerConfig {
    ///             program: "python3".into(),
    ///             args: vec!["research.py".into()],
    ///             cwd: None,
    ///             env: Default::default(),
    ///         }),
    ///     )
    ///     .phase(PhaseConfig::new("research", true))
    ///     .build()
    ///     .expect("Failed to build config");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration.
///
/// All values set via the builder are attributed to
/// `ConfigSource::Programmatic`; everything else reports `default`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    max_concurrent_jobs: Option<usize>,
    history_limit: Option<usize>,
    phase_timeout: Option<Duration>,
    log_format: Option<String>,
    poll_interval_secs: Option<u64>,
    poll_max_wait_secs: Option<u64>,
    query_timeout_secs: Option<u64>,
    phases: Vec<PhaseConfig>,
    producers: BTreeMap<String, ProducerConfig>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of jobs running at once (1..=256). Default: 4.
    #[must_use]
    pub fn max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = Some(jobs);
        self
    }

    /// Number of finished jobs kept for history. Default: 1000.
    #[must_use]
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Timeout for phases that do not set their own. Default: 600 seconds.
    #[must_use]
    pub fn phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = Some(timeout);
        self
    }

    /// `compact`, `verbose` or `json`.
    #[must_use]
    pub fn log_format(mut self, format: impl Into<String>) -> Self {
        self.log_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn poll_max_wait_secs(mut self, secs: u64) -> Self {
        self.poll_max_wait_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.query_timeout_secs = Some(secs);
        self
    }

    /// Append a phase to the pipeline.
    #[must_use]
    pub fn phase(mut self, phase: PhaseConfig) -> Self {
        self.phases.push(phase);
        self
    }

    /// Register a producer under `name`, replacing any previous entry.
    #[must_use]
    pub fn producer(mut self, name: impl Into<String>, producer: ProducerConfig) -> Self {
        self.producers.insert(name.into(), producer);
        self
    }

    /// Build and validate the `Config`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any value is out of range or the pipeline
    /// references an unknown producer.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut source_attribution = BTreeMap::new();
        let mut engine = EngineConfig::default();
        let mut poller = PollerConfig::default();
        let src = ConfigSource::Programmatic;

        if let Some(jobs) = self.max_concurrent_jobs {
            engine.max_concurrent_jobs = Some(jobs);
            source_attribution.insert("max_concurrent_jobs".to_string(), src);
        }
        if let Some(limit) = self.history_limit {
            engine.history_limit = Some(limit);
            source_attribution.insert("history_limit".to_string(), src);
        }
        if let Some(timeout) = self.phase_timeout {
            engine.phase_timeout_secs = Some(timeout.as_secs());
            source_attribution.insert("phase_timeout_secs".to_string(), src);
        }
        if let Some(format) = self.log_format {
            engine.log_format = Some(format);
            source_attribution.insert("log_format".to_string(), src);
        }
        if let Some(interval) = self.poll_interval_secs {
            poller.interval_secs = Some(interval);
            source_attribution.insert("poll_interval_secs".to_string(), src);
        }
        if let Some(max_wait) = self.poll_max_wait_secs {
            poller.max_wait_secs = Some(max_wait);
            source_attribution.insert("poll_max_wait_secs".to_string(), src);
        }
        if let Some(query) = self.query_timeout_secs {
            poller.query_timeout_secs = Some(query);
            source_attribution.insert("poll_query_timeout_secs".to_string(), src);
        }
        if !self.phases.is_empty() {
            source_attribution.insert("pipeline_phases".to_string(), src);
        }
        if !self.producers.is_empty() {
            source_attribution.insert("producers".to_string(), src);
        }

        let config = Config {
            engine,
            poller,
            pipeline: PipelineConfig {
                phases: self.phases,
            },
            producers: self.producers,
            source_attribution,
            config_file: None,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.max_concurrent_jobs(), 4);
        assert_eq!(config.history_limit(), 1000);
        assert_eq!(config.default_phase_timeout(), Duration::from_secs(600));
        assert!(config.source_attribution.is_empty());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_builder_values_are_programmatic() {
        let config = Config::builder()
            .max_concurrent_jobs(2)
            .phase_timeout(Duration::from_secs(30))
            .poll_interval_secs(1)
            .build()
            .unwrap();

        assert_eq!(config.max_concurrent_jobs(), 2);
        assert_eq!(config.default_phase_timeout(), Duration::from_secs(30));

        let effective = config.effective_config();
        assert_eq!(
            effective["max_concurrent_jobs"],
            ("2".to_string(), "programmatic".to_string())
        );
        assert_eq!(
            effective["poll_interval_secs"],
            ("1".to_string(), "programmatic".to_string())
        );
        assert_eq!(effective["history_limit"].1, "default");
    }

    #[test]
    fn test_builder_validates() {
        let err = Config::builder().history_limit(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "history_limit"));
    }
}
