//! End-to-end pipeline scenarios through the public library API
//!
//! Jobs are enqueued on an [`Orchestrator`] with in-process producers and
//! followed through the [`StatusReporter`], the way an embedding service
//! would use conveyor.

use async_trait::async_trait;
use conveyor::error::{ProviderError, QueryError};
use conveyor::poller::{TaskId, TaskStatusReport};
use conveyor::{
    AsyncProvider, FailureKind, FnProducer, JobRegistry, JobRequest, JobStatus, Orchestrator,
    OrchestratorConfig, Payload, PhaseContext, PhaseOutcome, PhaseSpec, PollPolicy,
    PolledProducer, Producer, ProducerCatalog, ProducerError, TaskPoller,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(30);

fn orchestrator(catalog: ProducerCatalog, max_concurrent_jobs: usize) -> Orchestrator {
    Orchestrator::new(
        Arc::new(JobRegistry::new()),
        catalog,
        OrchestratorConfig {
            max_concurrent_jobs,
        },
    )
}

fn echo(tag: &'static str) -> Arc<dyn Producer> {
    Arc::new(FnProducer::new(move |ctx| async move {
        Ok(json!({ "phase": tag, "subject": ctx.subject }))
    }))
}

fn failing(message: &'static str) -> Arc<dyn Producer> {
    Arc::new(FnProducer::new(move |_ctx| async move {
        Err(ProducerError::Provider(ProviderError::Outage(
            message.to_string(),
        )))
    }))
}

fn counted(calls: Arc<AtomicUsize>) -> Arc<dyn Producer> {
    Arc::new(FnProducer::new(move |_ctx| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("ran"))
        }
    }))
}

#[tokio::test]
async fn test_optional_failure_is_a_warning_and_later_phases_run() {
    let seen_by_c = Arc::new(Mutex::new(None));
    let c: Arc<dyn Producer> = {
        let seen = Arc::clone(&seen_by_c);
        Arc::new(FnProducer::new(move |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                let outcomes: Vec<(String, PhaseOutcome)> = ctx
                    .prior_results
                    .iter()
                    .map(|r| (r.phase_name.clone(), r.outcome))
                    .collect();
                *seen.lock().unwrap() = Some(outcomes);
                Ok(json!({ "built_on": ctx.prior_payload("A").cloned() }))
            }
        }))
    };

    let catalog = ProducerCatalog::new()
        .with("A", echo("A"))
        .with("B", failing("lookup service down"))
        .with("C", c);
    let orchestrator = orchestrator(catalog, 2);

    let id = orchestrator
        .enqueue(JobRequest::new(
            "Acme Corp",
            vec![
                PhaseSpec::required("A").with_weight(40),
                PhaseSpec::optional("B").with_weight(20),
                PhaseSpec::required("C").with_weight(40),
            ],
        ))
        .unwrap();

    let reporter = orchestrator.reporter();
    let status = reporter.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(status.status, JobStatus::Complete);
    assert_eq!(status.progress, 100);
    assert!(status.error.is_none());

    let results = reporter.get_results(&id).unwrap();
    let outcomes: Vec<_> = results
        .phase_results
        .iter()
        .map(|r| (r.phase_name.as_str(), r.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("A", PhaseOutcome::Success),
            ("B", PhaseOutcome::Warning),
            ("C", PhaseOutcome::Success),
        ]
    );
    assert_eq!(results.warnings(), vec!["B"]);
    let b_detail = results.phase_results[1].error_detail.clone().unwrap();
    assert_eq!(b_detail.kind, FailureKind::Provider);
    assert!(b_detail.message.contains("lookup service down"));

    assert_eq!(
        seen_by_c.lock().unwrap().clone().unwrap(),
        vec![
            ("A".to_string(), PhaseOutcome::Success),
            ("B".to_string(), PhaseOutcome::Warning),
        ]
    );
    assert_eq!(
        results.payload("C"),
        Some(&json!({ "built_on": { "phase": "A", "subject": "Acme Corp" } }))
    );
}

#[tokio::test]
async fn test_required_failure_stops_the_job() {
    let b_calls = Arc::new(AtomicUsize::new(0));
    let catalog = ProducerCatalog::new()
        .with("A", failing("research backend returned 500"))
        .with("B", counted(Arc::clone(&b_calls)));
    let orchestrator = orchestrator(catalog, 1);

    let id = orchestrator
        .enqueue(JobRequest::new(
            "Acme Corp",
            vec![
                PhaseSpec::required("A").with_weight(50),
                PhaseSpec::required("B").with_weight(50),
            ],
        ))
        .unwrap();

    let reporter = orchestrator.reporter();
    let status = reporter.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(status.status, JobStatus::Error);
    assert!(status.progress < 100);
    assert_eq!(status.current_phase, None);

    let error = status.error.unwrap();
    assert_eq!(error.phase.as_deref(), Some("A"));
    assert_eq!(error.kind, FailureKind::Provider);
    assert!(error.message.contains("research backend returned 500"));

    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        reporter.get_results(&id),
        Err(QueryError::NotReady {
            status: JobStatus::Error,
            ..
        })
    ));
}

#[tokio::test]
async fn test_concurrent_jobs_are_independent() {
    let catalog = ProducerCatalog::new()
        .with(
            "research",
            Arc::new(FnProducer::new(|ctx| async move {
                if ctx.subject == "Globex" {
                    Err(ProducerError::InvalidOutput("no public filings".into()))
                } else {
                    Ok(json!({ "subject": ctx.subject }))
                }
            })),
        )
        .with("summary", echo("summary"));
    let orchestrator = orchestrator(catalog, 4);
    let phases = || {
        vec![
            PhaseSpec::required("research").with_weight(50),
            PhaseSpec::required("summary").with_weight(50),
        ]
    };

    let acme = orchestrator
        .enqueue(JobRequest::new("Acme Corp", phases()))
        .unwrap();
    let globex = orchestrator
        .enqueue(JobRequest::new("Globex", phases()))
        .unwrap();
    assert_ne!(acme, globex);

    let reporter = orchestrator.reporter();
    let (acme_status, globex_status) = tokio::join!(
        reporter.wait_for_terminal(&acme, WAIT),
        reporter.wait_for_terminal(&globex, WAIT)
    );
    assert_eq!(acme_status.unwrap().status, JobStatus::Complete);
    assert_eq!(globex_status.unwrap().status, JobStatus::Error);

    let acme_results = reporter.get_results(&acme).unwrap();
    assert_eq!(
        acme_results.payload("research"),
        Some(&json!({ "subject": "Acme Corp" }))
    );

    let history = reporter.list_history(10);
    assert_eq!(history.total, 2);
}

fn lifecycle_rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued => 0,
        JobStatus::Running => 1,
        JobStatus::Complete | JobStatus::Error => 2,
    }
}

/// Provider that reports Processing `processing` times, then Success.
struct SlowRenderer {
    script: Mutex<VecDeque<TaskStatusReport>>,
    queries: AtomicUsize,
}

impl SlowRenderer {
    fn new(processing: usize) -> Self {
        let mut script: VecDeque<_> = (0..processing)
            .map(|_| TaskStatusReport::processing())
            .collect();
        script.push_back(TaskStatusReport::success(
            json!({ "resultUrls": ["https://cdn.example/acme.png"] }),
        ));
        Self {
            script: Mutex::new(script),
            queries: AtomicUsize::new(0),
        }
    }

    fn never_finishing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            queries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AsyncProvider for SlowRenderer {
    fn name(&self) -> &str {
        "slow-renderer"
    }

    async fn submit(&self, payload: &Payload) -> Result<TaskId, ProviderError> {
        assert_eq!(payload["prompt"], "Infographic about Acme Corp");
        Ok(TaskId::new("task-acme"))
    }

    async fn query(&self, _task_id: &TaskId) -> Result<TaskStatusReport, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(next.unwrap_or_else(TaskStatusReport::processing))
    }
}

fn polled(provider: Arc<SlowRenderer>, max_wait: Duration) -> Arc<dyn Producer> {
    let policy = PollPolicy::new(Duration::from_secs(5), max_wait);
    Arc::new(
        PolledProducer::new(TaskPoller::new(provider, policy)).with_payload(|ctx: &PhaseContext| {
            json!({ "prompt": format!("Infographic about {}", ctx.subject) })
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn test_polled_phase_finishes_after_three_intervals() {
    let provider = Arc::new(SlowRenderer::new(3));
    let catalog = ProducerCatalog::new().with(
        "illustrate",
        polled(Arc::clone(&provider), Duration::from_secs(120)),
    );
    let orchestrator = orchestrator(catalog, 1);

    let started = tokio::time::Instant::now();
    let id = orchestrator
        .enqueue(JobRequest::new(
            "Acme Corp",
            vec![PhaseSpec::required("illustrate").with_weight(100)],
        ))
        .unwrap();
    let status = orchestrator
        .reporter()
        .wait_for_terminal(&id, Duration::from_secs(600))
        .await
        .unwrap();

    assert_eq!(status.status, JobStatus::Complete);
    assert_eq!(provider.queries.load(Ordering::SeqCst), 4);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));

    let results = orchestrator.reporter().get_results(&id).unwrap();
    assert_eq!(
        results.payload("illustrate").unwrap()["resultUrls"][0],
        "https://cdn.example/acme.png"
    );
}

#[tokio::test(start_paused = true)]
async fn test_polled_phase_that_never_finishes_degrades_optional_phase() {
    let provider = Arc::new(SlowRenderer::never_finishing());
    let catalog = ProducerCatalog::new()
        .with("research", echo("research"))
        .with(
            "illustrate",
            polled(Arc::clone(&provider), Duration::from_secs(30)),
        );
    let orchestrator = orchestrator(catalog, 1);

    let id = orchestrator
        .enqueue(JobRequest::new(
            "Acme Corp",
            vec![
                PhaseSpec::required("research").with_weight(70),
                PhaseSpec::optional("illustrate").with_weight(30),
            ],
        ))
        .unwrap();
    let status = orchestrator
        .reporter()
        .wait_for_terminal(&id, Duration::from_secs(600))
        .await
        .unwrap();

    assert_eq!(status.status, JobStatus::Complete);
    assert_eq!(provider.queries.load(Ordering::SeqCst), 6);

    let results = orchestrator.reporter().get_results(&id).unwrap();
    assert_eq!(results.warnings(), vec!["illustrate"]);
    let detail = results.phase_results[1].error_detail.clone().unwrap();
    assert_eq!(detail.kind, FailureKind::Timeout);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn plan() -> impl Strategy<Value = Vec<(bool, bool)>> {
        // (required, fails) per phase
        proptest::collection::vec((any::<bool>(), any::<bool>()), 1..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_job_outcome_follows_required_failures(phases in plan()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let mut catalog = ProducerCatalog::new();
                let mut specs = Vec::new();
                for (i, (required, fails)) in phases.iter().enumerate() {
                    let name = format!("p{i}");
                    let producer = if *fails { failing("boom") } else { echo("ok") };
                    catalog.register(&name, producer);
                    specs.push(PhaseSpec::new(&name, *required).with_weight(10));
                }
                let orchestrator = orchestrator(catalog, 1);
                let registry = Arc::clone(orchestrator.registry());
                let mut changes = registry.subscribe();

                let id = orchestrator.enqueue(JobRequest::new("prop", specs)).unwrap();

                // Every observed snapshot must move forward.
                let mut last_progress = 0u8;
                let mut last_rank = lifecycle_rank(JobStatus::Queued);
                loop {
                    let job = registry.get(&id).unwrap();
                    prop_assert!(job.progress >= last_progress);
                    prop_assert!(lifecycle_rank(job.status) >= last_rank);
                    last_progress = job.progress;
                    last_rank = lifecycle_rank(job.status);
                    if job.is_terminal() {
                        break;
                    }
                    if changes.changed().await.is_err() {
                        break;
                    }
                }

                let job = registry.get(&id).unwrap();
                let first_required_failure =
                    phases.iter().position(|(required, fails)| *required && *fails);

                match first_required_failure {
                    Some(index) => {
                        prop_assert_eq!(job.status, JobStatus::Error);
                        prop_assert_eq!(job.phase_results.len(), index + 1);
                        let expected = format!("p{index}");
                        prop_assert_eq!(
                            job.error.as_ref().and_then(|e| e.phase.as_deref()),
                            Some(expected.as_str())
                        );
                    }
                    None => {
                        prop_assert_eq!(job.status, JobStatus::Complete);
                        prop_assert_eq!(job.progress, 100);
                        prop_assert_eq!(job.phase_results.len(), phases.len());
                        for (result, (_, fails)) in job.phase_results.iter().zip(&phases) {
                            let expected = if *fails {
                                PhaseOutcome::Warning
                            } else {
                                PhaseOutcome::Success
                            };
                            prop_assert_eq!(result.outcome, expected);
                        }
                    }
                }
                Ok(())
            })?;
        }
    }
}
