//! In-memory job registry for conveyor
//!
//! Owns every [`Job`] and is the only place job state changes. The job state
//! machine (`Queued → Running → Complete | Error`) and its invariants are
//! checked on each [`JobMutation`], so a status observer can never see a
//! finished job with missing required results or a progress value that went
//! backwards.

pub mod job;
pub mod registry;

pub use job::{Job, JobError, JobHistory, JobMutation, JobSummary, MAX_PROGRESS, PlannedPhase};
pub use registry::{DEFAULT_HISTORY_LIMIT, JobRegistry};

#[cfg(test)]
mod properties {
    use super::*;
    use conveyor_phase_api::{ErrorDetail, FailureKind, PhaseResult};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    enum Step {
        Enter(usize),
        Record(usize, u8, bool),
        Abort(usize),
        Complete,
        Fail,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..4).prop_map(Step::Enter),
            (0usize..4, 0u8..=100, any::<bool>()).prop_map(|(i, w, warn)| Step::Record(i, w, warn)),
            (0usize..4).prop_map(Step::Abort),
            Just(Step::Complete),
            Just(Step::Fail),
        ]
    }

    fn name(i: usize) -> String {
        format!("p{i}")
    }

    fn mutation(step: &Step) -> JobMutation {
        match step {
            Step::Enter(i) => JobMutation::EnterPhase { phase: name(*i) },
            Step::Record(i, weight, warn) => {
                let result = if *warn {
                    PhaseResult::failed(
                        name(*i),
                        ErrorDetail::new(FailureKind::Provider, "down"),
                        Duration::ZERO,
                    )
                    .into_warning()
                } else {
                    PhaseResult::success(name(*i), json!(i), Duration::ZERO)
                };
                JobMutation::RecordPhase {
                    result,
                    weight: *weight,
                }
            }
            Step::Abort(i) => JobMutation::Abort {
                result: PhaseResult::failed(
                    name(*i),
                    ErrorDetail::new(FailureKind::Timeout, "slow"),
                    Duration::ZERO,
                ),
            },
            Step::Complete => JobMutation::Complete,
            Step::Fail => JobMutation::Fail {
                error: JobError::new(FailureKind::Cancelled, "stopped"),
            },
        }
    }

    proptest! {
        #[test]
        fn prop_any_mutation_sequence_keeps_invariants(
            required in proptest::collection::vec(any::<bool>(), 1..4),
            steps in proptest::collection::vec(step(), 0..40),
        ) {
            let registry = JobRegistry::new();
            let plan = required
                .iter()
                .enumerate()
                .map(|(i, required)| PlannedPhase {
                    name: name(i),
                    required: *required,
                    weight: 25,
                })
                .collect();
            let job = registry.create("prop", BTreeMap::new(), plan);

            let mut last = job.clone();
            for step in &steps {
                let before = registry.get(&job.id).unwrap();
                match registry.update(&job.id, mutation(step)) {
                    Ok(after) => {
                        prop_assert!(before.status.can_transition_to(after.status));
                        last = after;
                    }
                    Err(_) => prop_assert_eq!(&registry.get(&job.id).unwrap(), &before),
                }

                let now = registry.get(&job.id).unwrap();
                prop_assert!(now.progress >= before.progress);
                prop_assert!(
                    now.status == before.status || before.status.can_transition_to(now.status)
                );
                prop_assert_eq!(
                    now.current_phase.is_none(),
                    now.status != conveyor_utils::types::JobStatus::Running
                );
            }

            if last.status == conveyor_utils::types::JobStatus::Complete {
                for planned in last.plan.iter().filter(|p| p.required) {
                    prop_assert!(
                        last.phase_results
                            .iter()
                            .any(|r| r.phase_name == planned.name && r.is_success())
                    );
                }
            }
        }
    }
}
