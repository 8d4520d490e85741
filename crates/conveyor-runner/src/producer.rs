use async_trait::async_trait;
use conveyor_phase_api::{Payload, PhaseContext, Producer, ProducerError};
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::command_spec::CommandSpec;

/// Bytes of stderr kept in a process failure.
pub const STDERR_TAIL_BYTES: usize = 2048;

/// [`Producer`] that runs a subprocess per phase.
///
/// Protocol with the child:
/// - stdin receives the [`PhaseContext`] as one JSON document, then EOF
/// - `CONVEYOR_JOB_ID`, `CONVEYOR_SUBJECT` and `CONVEYOR_PHASE` are set
/// - stdout is the payload: parsed as JSON, or kept as a string if it is not JSON
/// - a non-zero exit fails the phase with the tail of stderr
#[derive(Debug, Clone)]
pub struct CommandProducer {
    spec: CommandSpec,
}

impl CommandProducer {
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    #[must_use]
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

#[async_trait]
impl Producer for CommandProducer {
    async fn produce(&self, ctx: &PhaseContext) -> Result<Payload, ProducerError> {
        let program = self.spec.display_program();
        let input = serde_json::to_vec(ctx).map_err(|e| {
            ProducerError::InvalidOutput(format!("cannot encode phase context: {e}"))
        })?;

        let mut cmd = self.spec.to_tokio_command();
        cmd.env("CONVEYOR_JOB_ID", ctx.job_id.as_str())
            .env("CONVEYOR_SUBJECT", &ctx.subject)
            .env("CONVEYOR_PHASE", &ctx.phase);

        debug!(
            job_id = %ctx.job_id,
            phase = %ctx.phase,
            program = %program,
            "Spawning phase command"
        );
        let mut child = cmd.spawn().map_err(|e| ProducerError::Process {
            code: None,
            stderr_tail: format!("failed to start '{program}': {e}"),
        })?;

        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| ProducerError::Process {
            code: None,
            stderr_tail: format!("failed to wait for '{program}': {e}"),
        })?;
        if let Err(e) = fed {
            // A child that exits without reading stdin closes the pipe early.
            if e.kind() != ErrorKind::BrokenPipe {
                warn!(
                    phase = %ctx.phase,
                    program = %program,
                    error = %e,
                    "Could not write phase context to stdin"
                );
            }
        }

        if !output.status.success() {
            return Err(ProducerError::Process {
                code: output.status.code(),
                stderr_tail: stderr_tail(&output.stderr, STDERR_TAIL_BYTES),
            });
        }

        Ok(parse_stdout(&output.stdout))
    }
}

/// Interpret child stdout as a payload.
#[must_use]
pub fn parse_stdout(stdout: &[u8]) -> Payload {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Payload::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Payload::String(text.to_string()))
}

/// Last `max` bytes of `stderr`, lossily decoded and trimmed.
#[must_use]
pub fn stderr_tail(stderr: &[u8], max: usize) -> String {
    let start = stderr.len().saturating_sub(max);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_phase_api::{FailureKind, JobId};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn ctx() -> PhaseContext {
        PhaseContext {
            job_id: JobId::from_raw("job_cmd_0001"),
            subject: "Acme".into(),
            attributes: BTreeMap::from([("url".to_string(), "https://acme.test".to_string())]),
            phase: "research".into(),
            prior_results: Vec::new(),
        }
    }

    #[test]
    fn test_parse_stdout_variants() {
        assert_eq!(parse_stdout(b"{\"a\": 1}\n"), json!({"a": 1}));
        assert_eq!(parse_stdout(b"  plain text \n"), json!("plain text"));
        assert_eq!(parse_stdout(b"\n"), Payload::Null);
    }

    #[test]
    fn test_stderr_tail_keeps_the_end() {
        let long = format!("{}END", "x".repeat(5000));
        let tail = stderr_tail(long.as_bytes(), 16);
        assert!(tail.ends_with("END"));
        assert_eq!(tail.len(), 16);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_context_is_written_to_stdin() {
        let producer = CommandProducer::new(CommandSpec::new("cat"));
        let out = producer.produce(&ctx()).await.unwrap();
        assert_eq!(out["subject"], "Acme");
        assert_eq!(out["phase"], "research");
        assert_eq!(out["attributes"]["url"], "https://acme.test");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_environment_is_set() {
        let producer = CommandProducer::new(
            CommandSpec::new("sh")
                .arg("-c")
                .arg("printf '%s/%s/%s' \"$CONVEYOR_JOB_ID\" \"$CONVEYOR_SUBJECT\" \"$CONVEYOR_PHASE\""),
        );
        let out = producer.produce(&ctx()).await.unwrap();
        assert_eq!(out, json!("job_cmd_0001/Acme/research"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let producer = CommandProducer::new(
            CommandSpec::new("sh")
                .arg("-c")
                .arg("echo 'quota exhausted' >&2; exit 3"),
        );
        let err = producer.produce(&ctx()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Process);
        match err {
            ProducerError::Process { code, stderr_tail } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr_tail, "quota exhausted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_that_ignores_stdin_still_succeeds() {
        let producer = CommandProducer::new(CommandSpec::new("true"));
        assert_eq!(producer.produce(&ctx()).await.unwrap(), Payload::Null);
    }

    #[tokio::test]
    async fn test_missing_program_is_process_failure() {
        let producer = CommandProducer::new(CommandSpec::new("conveyor-no-such-program-xyz"));
        let err = producer.produce(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_cancels_child() {
        let producer = CommandProducer::new(CommandSpec::new("sleep").arg("30"));
        let started = std::time::Instant::now();
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(200), producer.produce(&ctx()))
                .await;
        assert!(result.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
