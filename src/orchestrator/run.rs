//! Deployment run records and progress events.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{FailureKind, OvercloudError, Result};
use crate::nodes::{NodeOutcome, NodeResult};
use crate::stack::{ResourceFailure, StackStatus};

/// Outcome of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The phase reached terminal success.
    Success,
    /// The phase failed.
    Failed,
    /// Watching stopped on operator request.
    Aborted,
}

/// One executed phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    /// Phase name (`plan-stage`, `stack-submit`, `poll`, ...).
    pub name: String,
    /// Batch label for per-batch phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
    /// Outcome.
    pub outcome: PhaseOutcome,
    /// Wall time spent in the phase.
    pub duration_ms: u64,
    /// Error or summary detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Per-node results for fan-out phases.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeResult>,
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every phase succeeded.
    Success,
    /// A phase failed. Later phases did not run.
    Failed {
        /// Failing phase.
        phase: String,
        /// Batch the failing phase belonged to.
        #[serde(skip_serializing_if = "Option::is_none")]
        batch: Option<String>,
        /// Failure kind.
        kind: FailureKind,
        /// Error message.
        detail: String,
        /// Failed stack resources, oldest first.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        resource_failures: Vec<ResourceFailure>,
    },
    /// The operator cancelled while a phase was waiting. The remote operation
    /// status is unknown.
    Aborted {
        /// Phase that was being watched.
        phase: String,
        /// Error message.
        detail: String,
    },
}

/// Aggregate result of one orchestrator operation.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRun {
    /// Operation name (`deploy`, `update run`, ...).
    pub operation: String,
    /// Plan name.
    pub plan: String,
    /// Stack name.
    pub stack: String,
    /// Run identifier.
    pub run_id: Uuid,
    /// Host the run was invoked from.
    pub host: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Fingerprint of the configuration the run used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    /// Executed phases in order.
    pub phases: Vec<PhaseRecord>,
    /// Final outcome.
    pub outcome: RunOutcome,
}

impl DeploymentRun {
    /// Creates a run record.
    #[must_use]
    pub fn new(operation: impl Into<String>, plan: &str, stack: &str) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| String::from("unknown"));

        Self {
            operation: operation.into(),
            plan: plan.to_string(),
            stack: stack.to_string(),
            run_id: Uuid::new_v4(),
            host,
            started_at: Utc::now(),
            finished_at: None,
            config_hash: None,
            phases: Vec::new(),
            outcome: RunOutcome::Success,
        }
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Success)
    }

    /// Returns the failure kind, or `None` on success.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            RunOutcome::Success => None,
            RunOutcome::Failed { kind, .. } => Some(*kind),
            RunOutcome::Aborted { .. } => Some(FailureKind::Cancelled),
        }
    }

    /// Returns the name of the failed or aborted phase.
    #[must_use]
    pub fn failed_phase(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Success => None,
            RunOutcome::Failed { phase, .. } | RunOutcome::Aborted { phase, .. } => Some(phase),
        }
    }

    /// Returns the process exit status for this run.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self.failure_kind() {
            None => 0,
            Some(kind) => kind.exit_code(),
        }
    }

    /// Returns the phase names in execution order.
    #[must_use]
    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Progress reported while a run executes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A phase started.
    PhaseStarted {
        /// Phase name.
        phase: String,
        /// Batch label.
        batch: Option<String>,
    },
    /// A phase ended.
    PhaseFinished {
        /// Phase name.
        phase: String,
        /// Batch label.
        batch: Option<String>,
        /// Outcome.
        outcome: PhaseOutcome,
    },
    /// The stack reached a terminal status.
    StackStatus {
        /// Stack name.
        stack: String,
        /// Observed status.
        status: StackStatus,
    },
    /// A workflow emitted a message.
    WorkflowMessage {
        /// Workflow name.
        workflow: String,
        /// Node the execution applies to.
        node: Option<String>,
        /// Message payload.
        payload: Value,
    },
    /// A node reached an outcome.
    NodeOutcome {
        /// Node name or identifier.
        node: String,
        /// What happened.
        outcome: NodeOutcome,
    },
}

/// Optional progress channel.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink(Option<UnboundedSender<ProgressEvent>>);

impl ProgressSink {
    /// Creates a sink that forwards to `sender`.
    #[must_use]
    pub const fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self(Some(sender))
    }

    /// Sends an event. A dropped receiver is ignored.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event);
        }
    }
}

/// Builds a [`DeploymentRun`] while phases execute.
#[derive(Debug)]
pub(crate) struct RunRecorder {
    run: DeploymentRun,
    progress: ProgressSink,
}

impl RunRecorder {
    pub(crate) fn new(run: DeploymentRun, progress: ProgressSink) -> Self {
        info!(
            "Starting {} of stack {} (run {})",
            run.operation, run.stack, run.run_id
        );
        Self { run, progress }
    }

    pub(crate) const fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Runs one phase and records its outcome.
    pub(crate) async fn phase<T, Fut>(
        &mut self,
        name: &str,
        batch: Option<&str>,
        work: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let batch = batch.map(str::to_string);
        self.progress.emit(ProgressEvent::PhaseStarted {
            phase: name.to_string(),
            batch: batch.clone(),
        });
        info!(
            "Phase {name}{} started",
            batch.as_deref().map(|b| format!(" [{b}]")).unwrap_or_default()
        );

        let started = Instant::now();
        let result = work.await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (outcome, detail) = match &result {
            Ok(_) => (PhaseOutcome::Success, None),
            Err(e) if e.kind() == FailureKind::Cancelled => {
                (PhaseOutcome::Aborted, Some(e.to_string()))
            }
            Err(e) => (PhaseOutcome::Failed, Some(e.to_string())),
        };

        self.run.phases.push(PhaseRecord {
            name: name.to_string(),
            batch: batch.clone(),
            outcome,
            duration_ms,
            detail,
            nodes: Vec::new(),
        });
        self.progress.emit(ProgressEvent::PhaseFinished {
            phase: name.to_string(),
            batch,
            outcome,
        });

        result
    }

    /// Sets the detail of the last phase.
    pub(crate) fn note(&mut self, detail: impl Into<String>) {
        if let Some(phase) = self.run.phases.last_mut() {
            phase.detail = Some(detail.into());
        }
    }

    /// Attaches per-node results to the last phase.
    pub(crate) fn attach_nodes(&mut self, nodes: Vec<NodeResult>) {
        if let Some(phase) = self.run.phases.last_mut() {
            phase.nodes = nodes;
        }
    }

    /// Marks the last phase as failed by `error` and returns the error.
    pub(crate) fn fail_last(&mut self, error: OvercloudError) -> OvercloudError {
        if let Some(phase) = self.run.phases.last_mut() {
            phase.outcome = if error.kind() == FailureKind::Cancelled {
                PhaseOutcome::Aborted
            } else {
                PhaseOutcome::Failed
            };
            phase.detail = Some(error.to_string());
        }
        error
    }

    /// Closes the run with the result of its phase sequence.
    pub(crate) fn finish(mut self, result: Result<()>) -> DeploymentRun {
        self.run.finished_at = Some(Utc::now());

        let Err(error) = result else {
            info!(
                "{} of stack {} succeeded ({} phase(s))",
                self.run.operation,
                self.run.stack,
                self.run.phases.len()
            );
            return self.run;
        };

        let (phase, batch) = self
            .run
            .phases
            .last()
            .filter(|p| p.outcome != PhaseOutcome::Success)
            .map_or_else(
                || (String::from("setup"), None),
                |p| (p.name.clone(), p.batch.clone()),
            );

        let kind = error.kind().escalated();
        self.run.outcome = if kind == FailureKind::Cancelled {
            warn!(
                "{} of stack {} aborted during {phase}; remote status unknown",
                self.run.operation, self.run.stack
            );
            RunOutcome::Aborted {
                phase,
                detail: error.to_string(),
            }
        } else {
            error!(
                "{} of stack {} failed during {phase} ({kind}): {error}",
                self.run.operation, self.run.stack
            );
            RunOutcome::Failed {
                phase,
                batch,
                kind,
                detail: error.to_string(),
                resource_failures: error.resource_failures().to_vec(),
            }
        };
        self.run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PollError, StackError};

    #[tokio::test]
    async fn test_failed_phase_is_reported() {
        let mut recorder =
            RunRecorder::new(DeploymentRun::new("update run", "overcloud", "overcloud"), ProgressSink::default());

        recorder
            .phase("plan-stage", None, async { Ok(()) })
            .await
            .unwrap();
        let result = recorder
            .phase("stack-submit", Some("Controller"), async {
                Err::<(), _>(
                    StackError::Conflict {
                        stack: String::from("overcloud"),
                        status: String::from("UPDATE_IN_PROGRESS"),
                    }
                    .into(),
                )
            })
            .await;

        let run = recorder.finish(result);
        assert_eq!(run.phase_names(), ["plan-stage", "stack-submit"]);
        assert_eq!(run.failed_phase(), Some("stack-submit"));
        assert_eq!(run.failure_kind(), Some(FailureKind::Conflict));
        assert_eq!(run.exit_code(), 3);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut recorder = RunRecorder::new(
            DeploymentRun::new("deploy", "overcloud", "overcloud"),
            ProgressSink::new(tx),
        );

        let result = recorder
            .phase("poll", None, async {
                Err::<(), _>(
                    PollError::Cancelled {
                        what: String::from("stack overcloud CREATE"),
                    }
                    .into(),
                )
            })
            .await;
        let run = recorder.finish(result);

        assert!(matches!(run.outcome, RunOutcome::Aborted { .. }));
        assert_eq!(run.phases[0].outcome, PhaseOutcome::Aborted);
        assert_eq!(run.exit_code(), FailureKind::Cancelled.exit_code());

        assert!(matches!(rx.recv().await, Some(ProgressEvent::PhaseStarted { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::PhaseFinished {
                outcome: PhaseOutcome::Aborted,
                ..
            })
        ));
    }

    #[test]
    fn test_run_serializes_outcome() {
        let run = DeploymentRun::new("delete", "overcloud", "overcloud");
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["outcome"]["status"], "success");
        assert_eq!(json["operation"], "delete");
    }
}
