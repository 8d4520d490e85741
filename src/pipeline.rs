//! Wiring a loaded [`Config`] into a running engine.
//!
//! Producers declared under `[producers.<name>]` become catalog entries:
//! `command` producers run a subprocess per phase, `http_task` producers
//! submit a task to a provider and poll it until it finishes.

use conveyor_config::{CommandProducerConfig, Config, HttpTaskProducerConfig, ProducerConfig};
use conveyor_engine::{JobRequest, Orchestrator, OrchestratorConfig};
use conveyor_phase_api::{Payload, PhaseContext, ProducerCatalog};
use conveyor_poller::{HttpTaskProvider, HttpTaskSettings, PollPolicy, PolledProducer, TaskPoller};
use conveyor_registry::JobRegistry;
use conveyor_runner::{CommandProducer, CommandSpec};
use conveyor_utils::error::{ConfigError, ConveyorError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(subject|phase|job_id|attr\.[A-Za-z0-9_.-]+)\}").expect("valid regex")
});

/// Build an orchestrator with every configured producer registered.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a producer cannot be constructed,
/// for example when an HTTP task producer's API key variable is unset.
pub fn orchestrator_from_config(config: &Config) -> Result<Orchestrator, ConveyorError> {
    let catalog = build_catalog(config)?;
    let registry = Arc::new(JobRegistry::with_history_limit(config.history_limit()));
    Ok(Orchestrator::new(
        registry,
        catalog,
        OrchestratorConfig {
            max_concurrent_jobs: config.max_concurrent_jobs(),
        },
    ))
}

/// A job request for `subject` running the configured pipeline.
///
/// # Errors
///
/// Returns `ConfigError::MissingRequired` if no phases are configured.
pub fn job_request(
    config: &Config,
    subject: impl Into<String>,
    attributes: BTreeMap<String, String>,
) -> Result<JobRequest, ConfigError> {
    Ok(JobRequest::new(subject, config.phase_specs()?).with_attributes(attributes))
}

/// Register every `[producers.<name>]` entry under its name.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` keyed by the producer if it cannot be
/// built.
pub fn build_catalog(config: &Config) -> Result<ProducerCatalog, ConfigError> {
    let mut catalog = ProducerCatalog::new();
    for (name, producer) in &config.producers {
        match producer {
            ProducerConfig::Command(cmd) => {
                catalog.register(name, Arc::new(command_producer(cmd)));
            }
            ProducerConfig::HttpTask(http) => {
                catalog.register(name, Arc::new(http_task_producer(name, http, config)?));
            }
        }
        debug!(producer = %name, kind = producer.kind(), "Registered producer");
    }
    Ok(catalog)
}

fn command_producer(cfg: &CommandProducerConfig) -> CommandProducer {
    let mut spec = CommandSpec::new(&cfg.program)
        .args(&cfg.args)
        .envs(&cfg.env);
    if let Some(cwd) = &cfg.cwd {
        spec = spec.cwd(cwd);
    }
    CommandProducer::new(spec)
}

fn http_task_producer(
    name: &str,
    cfg: &HttpTaskProducerConfig,
    config: &Config,
) -> Result<PolledProducer, ConfigError> {
    let mut settings = HttpTaskSettings::new(name, &cfg.model);
    if let Some(base_url) = &cfg.base_url {
        settings.base_url.clone_from(base_url);
    }
    if let Some(env) = &cfg.api_key_env {
        settings.api_key_env.clone_from(env);
    }
    if let Some(secs) = cfg.submit_timeout_secs {
        settings.submit_timeout = Duration::from_secs(secs);
    }

    let provider = HttpTaskProvider::from_env(settings).map_err(|e| ConfigError::InvalidValue {
        key: format!("producers.{name}"),
        value: e.to_string(),
    })?;

    let poll = config.poll_settings(Some(cfg));
    let policy =
        PollPolicy::new(poll.interval, poll.max_wait).with_query_timeout(poll.query_timeout);
    let producer = PolledProducer::new(TaskPoller::new(Arc::new(provider), policy));

    Ok(match cfg.input.clone() {
        Some(template) => {
            producer.with_payload(move |ctx: &PhaseContext| render_template(&template, ctx))
        }
        None => producer,
    })
}

/// Fill `{subject}`, `{phase}`, `{job_id}` and `{attr.<key>}` placeholders
/// in every string of `template`. Unknown attributes render as empty.
#[must_use]
pub fn render_template(template: &Payload, ctx: &PhaseContext) -> Payload {
    match template {
        Payload::String(s) => Payload::String(fill(s, ctx)),
        Payload::Array(items) => {
            Payload::Array(items.iter().map(|item| render_template(item, ctx)).collect())
        }
        Payload::Object(map) => Payload::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_template(value, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn fill(text: &str, ctx: &PhaseContext) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| match &caps[1] {
            "subject" => ctx.subject.clone(),
            "phase" => ctx.phase.clone(),
            "job_id" => ctx.job_id.to_string(),
            key => {
                let attr = key.trim_start_matches("attr.");
                ctx.attributes.get(attr).cloned().unwrap_or_default()
            }
        })
        .into_owned()
}
