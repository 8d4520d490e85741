use conveyor_utils::error::ConfigError;
use std::collections::HashSet;

use super::{Config, ProducerConfig};

/// Upper bound on concurrently running jobs
const MAX_CONCURRENT_JOBS: usize = 256;

/// Upper bound on retained history
const MAX_HISTORY_LIMIT: usize = 100_000;

/// Upper bound on any timeout, in seconds (24 hours)
const MAX_TIMEOUT_SECS: u64 = 86_400;

const LOG_FORMATS: [&str; 3] = ["compact", "verbose", "json"];

fn invalid(key: impl Into<String>, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

fn check_range(key: &str, value: Option<u64>, min: u64, max: u64) -> Result<(), ConfigError> {
    match value {
        Some(v) if v < min => Err(invalid(key, format!("must be at least {min}"))),
        Some(v) if v > max => Err(invalid(key, format!("exceeds maximum limit of {max}"))),
        _ => Ok(()),
    }
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "max_concurrent_jobs",
            self.engine.max_concurrent_jobs.map(|v| v as u64),
            1,
            MAX_CONCURRENT_JOBS as u64,
        )?;
        check_range(
            "history_limit",
            self.engine.history_limit.map(|v| v as u64),
            1,
            MAX_HISTORY_LIMIT as u64,
        )?;
        check_range(
            "phase_timeout_secs",
            self.engine.phase_timeout_secs,
            1,
            MAX_TIMEOUT_SECS,
        )?;
        if let Some(format) = &self.engine.log_format
            && !LOG_FORMATS.contains(&format.as_str())
        {
            return Err(invalid(
                "log_format",
                format!("'{format}' (expected one of: {})", LOG_FORMATS.join(", ")),
            ));
        }

        check_range("poll_interval_secs", self.poller.interval_secs, 1, MAX_TIMEOUT_SECS)?;
        check_range("poll_max_wait_secs", self.poller.max_wait_secs, 1, MAX_TIMEOUT_SECS)?;
        check_range(
            "poll_query_timeout_secs",
            self.poller.query_timeout_secs,
            1,
            MAX_TIMEOUT_SECS,
        )?;

        self.validate_producers()?;
        self.validate_pipeline()
    }

    fn validate_producers(&self) -> Result<(), ConfigError> {
        for (name, producer) in &self.producers {
            match producer {
                ProducerConfig::Command(cmd) => {
                    if cmd.program.trim().is_empty() {
                        return Err(invalid(
                            format!("producers.{name}.program"),
                            "must not be empty",
                        ));
                    }
                }
                ProducerConfig::HttpTask(http) => {
                    if http.model.trim().is_empty() {
                        return Err(invalid(format!("producers.{name}.model"), "must not be empty"));
                    }
                    check_range(
                        &format!("producers.{name}.submit_timeout_secs"),
                        http.submit_timeout_secs,
                        1,
                        MAX_TIMEOUT_SECS,
                    )?;
                    let poll = self.poll_settings(Some(http));
                    if poll.interval.is_zero() || poll.interval > poll.max_wait {
                        return Err(invalid(
                            format!("producers.{name}.interval_secs"),
                            format!(
                                "poll interval {}s must be between 1s and max_wait {}s",
                                poll.interval.as_secs(),
                                poll.max_wait.as_secs()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for (index, phase) in self.pipeline.phases.iter().enumerate() {
            let key = format!("pipeline.phases[{index}]");
            if phase.name.trim().is_empty() {
                return Err(invalid(format!("{key}.name"), "must not be empty"));
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(invalid(
                    format!("{key}.name"),
                    format!("duplicate phase name '{}'", phase.name),
                ));
            }
            if phase.weight > 100 {
                return Err(invalid(
                    format!("{key}.weight"),
                    format!("{} exceeds 100", phase.weight),
                ));
            }
            check_range(&format!("{key}.timeout_secs"), phase.timeout_secs, 1, MAX_TIMEOUT_SECS)?;

            let producer_name = phase.producer_name();
            let producer = self.producers.get(producer_name).ok_or_else(|| {
                ConfigError::UnknownProducer {
                    phase: phase.name.clone(),
                    producer: producer_name.to_string(),
                }
            })?;

            // A poll loop must finish before the phase timeout cancels it.
            if let ProducerConfig::HttpTask(http) = producer {
                let poll = self.poll_settings(Some(http));
                let timeout = self.phase_timeout(phase);
                if poll.max_wait >= timeout {
                    return Err(invalid(
                        format!("{key}.timeout_secs"),
                        format!(
                            "phase timeout {}s must exceed the poll max_wait {}s of producer '{producer_name}'",
                            timeout.as_secs(),
                            poll.max_wait.as_secs()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
