//! HTTP task provider
//!
//! Talks to a create-task / record-info style API: a POST creates a task
//! and returns its id, a GET reports the task's state. Responses use an
//! envelope of the form `{"code": 200, "msg": "...", "data": {...}}`.
//!
//! Provider states map onto [`TaskState`] as follows:
//!
//! | Provider state | TaskState |
//! |----------------|-----------|
//! | `waiting`, `queuing` | `Queued` |
//! | `generating` | `Processing` |
//! | `success` | `Success` (result from `resultJson`) |
//! | `fail` | `Fail` (reason from `failMsg`) |

use async_trait::async_trait;
use conveyor_phase_api::Payload;
use conveyor_utils::error::ProviderError;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::http_client::{HttpClient, redact_error_message};
use crate::poller::AsyncProvider;
use crate::task::{TaskId, TaskState, TaskStatusReport};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.kie.ai/api/v1";

/// Default environment variable holding the API key
pub const DEFAULT_API_KEY_ENV: &str = "KEI_AI_API_KEY";

/// Default timeout for task submission
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_TASK_PATH: &str = "jobs/createTask";
const RECORD_INFO_PATH: &str = "jobs/recordInfo";
const ENVELOPE_OK: i64 = 200;

/// Connection settings for [`HttpTaskProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTaskSettings {
    /// Name used in logs and error messages
    pub name: String,
    pub base_url: String,
    /// Model identifier sent with each task
    pub model: String,
    /// Environment variable the API key is read from
    pub api_key_env: String,
    pub submit_timeout: Duration,
}

impl HttpTaskSettings {
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

/// [`AsyncProvider`] for HTTP create-task / record-info APIs.
#[derive(Clone)]
pub struct HttpTaskProvider {
    client: HttpClient,
    settings: HttpTaskSettings,
    api_key: String,
    create_url: Url,
    query_url: Url,
}

impl HttpTaskProvider {
    /// Build a provider with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Misconfiguration` if the base URL is invalid
    /// or the HTTP client cannot be constructed.
    pub fn new(settings: HttpTaskSettings, api_key: String) -> Result<Self, ProviderError> {
        let base = settings.base_url.trim_end_matches('/');
        let join = |path: &str| {
            Url::parse(&format!("{base}/{path}")).map_err(|e| {
                ProviderError::Misconfiguration(format!(
                    "invalid base_url '{}' for {}: {e}",
                    settings.base_url, settings.name
                ))
            })
        };
        let create_url = join(CREATE_TASK_PATH)?;
        let query_url = join(RECORD_INFO_PATH)?;

        Ok(Self {
            client: HttpClient::new()?,
            settings,
            api_key,
            create_url,
            query_url,
        })
    }

    /// Build a provider, reading the API key from `settings.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Misconfiguration` if the variable is unset or empty.
    pub fn from_env(settings: HttpTaskSettings) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::Misconfiguration(format!(
                    "API key for '{}' not found in environment variable '{}'",
                    settings.name, settings.api_key_env
                ))
            })?;
        Self::new(settings, api_key)
    }

    #[must_use]
    pub fn settings(&self) -> &HttpTaskSettings {
        &self.settings
    }

    async fn read_envelope(
        &self,
        response: reqwest::Response,
    ) -> Result<Envelope, ProviderError> {
        let body = response.text().await.map_err(|e| {
            ProviderError::Transport(format!(
                "{} response could not be read: {}",
                self.settings.name,
                redact_error_message(&e.to_string())
            ))
        })?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::Malformed(format!("{} returned invalid JSON: {e}", self.settings.name))
        })
    }
}

#[async_trait]
impl AsyncProvider for HttpTaskProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn submit(&self, payload: &Payload) -> Result<TaskId, ProviderError> {
        let body = json!({ "model": self.settings.model, "input": payload });
        let request = self
            .client
            .inner()
            .post(self.create_url.clone())
            .bearer_auth(&self.api_key)
            .json(&body);

        // Resent only if the connection failed; anything later could duplicate the task.
        let response = self
            .client
            .execute_with_retry(request, self.settings.submit_timeout, &self.settings.name)
            .await?;
        let envelope = self.read_envelope(response).await?;
        parse_submit_envelope(envelope)
    }

    async fn query(&self, task_id: &TaskId) -> Result<TaskStatusReport, ProviderError> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut().append_pair("taskId", task_id.as_str());
        let request = self.client.inner().get(url).bearer_auth(&self.api_key);

        // The poller bounds each query; this timeout only guards a hung connection.
        let response = self
            .client
            .execute_once(request, self.settings.submit_timeout, &self.settings.name)
            .await?;
        let envelope = self.read_envelope(response).await?;
        debug!(
            provider = %self.settings.name,
            task_id = %task_id,
            code = envelope.code,
            "Queried task"
        );
        parse_query_envelope(envelope)
    }
}

impl std::fmt::Debug for HttpTaskProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskProvider")
            .field("settings", &self.settings)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedTask {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordInfo {
    state: String,
    #[serde(default)]
    result_json: Option<String>,
    #[serde(default)]
    fail_msg: Option<String>,
}

fn envelope_message(envelope: &Envelope) -> String {
    envelope
        .msg
        .clone()
        .unwrap_or_else(|| format!("provider returned code {}", envelope.code))
}

fn parse_submit_envelope(envelope: Envelope) -> Result<TaskId, ProviderError> {
    if envelope.code != ENVELOPE_OK {
        return Err(ProviderError::Rejected(redact_error_message(&envelope_message(
            &envelope,
        ))));
    }
    let data = envelope
        .data
        .ok_or_else(|| ProviderError::Malformed("create-task response has no data".into()))?;
    let created: CreatedTask = serde_json::from_value(data)
        .map_err(|e| ProviderError::Malformed(format!("create-task data: {e}")))?;
    created
        .task_id
        .filter(|id| !id.is_empty())
        .map(TaskId::new)
        .ok_or_else(|| ProviderError::Malformed("no taskId in create-task response".into()))
}

fn parse_query_envelope(envelope: Envelope) -> Result<TaskStatusReport, ProviderError> {
    if envelope.code != ENVELOPE_OK {
        // Non-OK query envelopes are treated as a failure to check status, not a task failure.
        return Err(ProviderError::Outage(redact_error_message(&envelope_message(
            &envelope,
        ))));
    }
    let data = envelope
        .data
        .ok_or_else(|| ProviderError::Malformed("record-info response has no data".into()))?;
    let info: RecordInfo = serde_json::from_value(data)
        .map_err(|e| ProviderError::Malformed(format!("record-info data: {e}")))?;

    let state = map_provider_state(&info.state)?;
    Ok(match state {
        TaskState::Success => TaskStatusReport::success(parse_result_json(info.result_json)),
        TaskState::Fail => TaskStatusReport::fail(
            info.fail_msg
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Unknown error".to_string()),
        ),
        TaskState::Queued => TaskStatusReport::queued(),
        TaskState::Processing => TaskStatusReport::processing(),
    })
}

/// Map a provider state string onto [`TaskState`].
pub fn map_provider_state(state: &str) -> Result<TaskState, ProviderError> {
    match state.to_ascii_lowercase().as_str() {
        "waiting" | "queuing" | "queued" => Ok(TaskState::Queued),
        "generating" | "processing" => Ok(TaskState::Processing),
        "success" => Ok(TaskState::Success),
        "fail" | "failed" => Ok(TaskState::Fail),
        other => Err(ProviderError::Malformed(format!(
            "unknown task state '{other}'"
        ))),
    }
}

/// `resultJson` is a JSON document encoded as a string; keep the raw string
/// if it does not parse.
fn parse_result_json(raw: Option<String>) -> Payload {
    match raw {
        None => Payload::Null,
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Payload::String(raw)),
    }
}
