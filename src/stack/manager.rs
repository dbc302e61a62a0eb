//! Stack client: guarded submission, polling and failure retrieval.
//!
//! The orchestration service is the authority on stack state. Before every
//! mutation the client fetches a fresh status and refuses to submit while
//! another mutation is running. This is an optimistic precondition, not a
//! lock: a race with another operator still ends in a conflict reported by the
//! service, and both outcomes are surfaced as [`StackError::Conflict`]-kind
//! errors.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Result, StackError};
use crate::plan::{Parameters, PlanExport};
use crate::poll::Poller;

use super::client::OrchestrationService;
use super::types::{
    ResourceFailure, StackAction, StackOperation, StackPhase, StackRecord, StackStatus,
    StackSubmission, SubmitMode,
};

/// Drives stack operations against an orchestration service.
#[derive(Debug)]
pub struct StackClient<S> {
    service: S,
}

impl<S: OrchestrationService> StackClient<S> {
    /// Creates a stack client.
    #[must_use]
    pub const fn new(service: S) -> Self {
        Self { service }
    }

    /// Returns the underlying service.
    #[must_use]
    pub const fn service(&self) -> &S {
        &self.service
    }

    /// Gets the current stack record.
    ///
    /// # Errors
    ///
    /// Returns an error if the service call fails.
    pub async fn status(&self, stack: &str) -> Result<Option<StackRecord>> {
        self.service.get_stack(stack).await
    }

    /// Submits a create or update built from a plan export.
    ///
    /// `extra` is merged over the exported parameters for this submission only.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Conflict`] if a mutation is in flight or a create
    /// targets an existing stack, [`StackError::NotFound`] if an update
    /// targets an absent stack, or the service error.
    pub async fn submit(
        &self,
        stack: &str,
        export: &PlanExport,
        mode: SubmitMode,
        extra: &Parameters,
    ) -> Result<StackOperation> {
        let current = self.live_record(stack).await?;
        let previous = current.as_ref().map(|r| r.status.clone());

        if let Some(status) = &previous
            && status.is_in_progress()
        {
            warn!("Stack {stack} is {status}; not submitting");
            return Err(StackError::Conflict {
                stack: stack.to_string(),
                status: status.to_string(),
            }
            .into());
        }

        let action = match (mode, &previous) {
            (SubmitMode::Create, Some(status)) => {
                return Err(StackError::Conflict {
                    stack: stack.to_string(),
                    status: status.to_string(),
                }
                .into());
            }
            (SubmitMode::Update, None) => {
                return Err(StackError::NotFound {
                    stack: stack.to_string(),
                }
                .into());
            }
            (SubmitMode::Create | SubmitMode::CreateOrUpdate, None) => StackAction::Create,
            (SubmitMode::Update | SubmitMode::CreateOrUpdate, Some(_)) => StackAction::Update,
        };

        let export = if extra.is_empty() {
            export.clone()
        } else {
            export.with_parameters(extra)
        };
        let submission = StackSubmission {
            stack_name: stack.to_string(),
            files: export.templates,
            parameters: export.parameters,
            plan_digest: export.digest,
        };

        match action {
            StackAction::Create => self.service.create_stack(&submission).await?,
            _ => self.service.update_stack(&submission).await?,
        }

        info!(
            "Submitted {action} of stack {stack} (plan digest {})",
            &submission.plan_digest[..submission.plan_digest.len().min(8)]
        );

        Ok(StackOperation {
            stack: stack.to_string(),
            action,
            submitted_at: Utc::now(),
            previous,
            previous_updated: current.and_then(|r| r.updated_time),
            pending: true,
        })
    }

    /// Submits a delete. Deleting an absent or already deleted stack succeeds
    /// with a handle that has no pending work.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Conflict`] if a create or update is in flight.
    pub async fn delete(&self, stack: &str) -> Result<StackOperation> {
        let current = self.live_record(stack).await?;
        let previous = current.as_ref().map(|r| r.status.clone());

        let mut operation = StackOperation {
            stack: stack.to_string(),
            action: StackAction::Delete,
            submitted_at: Utc::now(),
            previous: previous.clone(),
            previous_updated: current.as_ref().and_then(|r| r.updated_time),
            pending: false,
        };

        match previous {
            None => {
                info!("Stack {stack} does not exist; nothing to delete");
                return Ok(operation);
            }
            Some(StackStatus::DeleteInProgress) => {
                info!("Stack {stack} is already being deleted");
                operation.pending = true;
                return Ok(operation);
            }
            Some(status) if status.is_in_progress() => {
                return Err(StackError::Conflict {
                    stack: stack.to_string(),
                    status: status.to_string(),
                }
                .into());
            }
            Some(_) => {}
        }

        operation.pending = self.service.delete_stack(stack).await?;
        operation.submitted_at = Utc::now();
        if operation.pending {
            info!("Submitted DELETE of stack {stack}");
        }
        Ok(operation)
    }

    /// Observes the stack once.
    ///
    /// Until the service has picked the operation up, the handle's in-progress
    /// status is reported. That covers a status from a different action and a
    /// leftover terminal status equal to the one seen before submission.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::NotFound`] if the stack vanished during a create
    /// or update, or the service error.
    pub async fn poll(&self, operation: &StackOperation) -> Result<StackStatus> {
        Ok(self.observe(operation, false).await?.status)
    }

    /// Polls until the operation reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Failed`] with the failed resources if the
    /// operation failed, or the poll error on timeout or cancellation.
    pub async fn wait(&self, operation: &StackOperation, poller: &Poller) -> Result<StackStatus> {
        if !operation.pending {
            return Ok(StackStatus::of(operation.action, StackPhase::Complete));
        }

        let window = poller.start(format!("stack {} {}", operation.stack, operation.action));
        let mut started = false;
        let (status, reason) = loop {
            let observed = window.observe(self.observe(operation, started)).await?;
            started |= observed.picked_up;
            if observed.picked_up && observed.status.is_terminal() {
                break (observed.status, observed.reason);
            }
            window.wait_next().await?;
        };

        if status.is_failed() {
            let failures = self.get_failures(&operation.stack).await.unwrap_or_else(|e| {
                warn!("Could not fetch failures of stack {}: {e}", operation.stack);
                Vec::new()
            });
            return Err(StackError::Failed {
                stack: operation.stack.clone(),
                status: status.to_string(),
                reason,
                failures,
            }
            .into());
        }

        info!("Stack {} reached {status}", operation.stack);
        Ok(status)
    }

    /// Returns failed resources ordered by time, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the service call fails.
    pub async fn get_failures(&self, stack: &str) -> Result<Vec<ResourceFailure>> {
        let mut failed: Vec<_> = self
            .service
            .list_resources(stack)
            .await?
            .into_iter()
            .filter(|r| r.resource_status.is_failed())
            .collect();

        // Resources without a timestamp sort last.
        failed.sort_by_key(|r| (r.updated_time.is_none(), r.updated_time));

        Ok(failed
            .into_iter()
            .map(|r| ResourceFailure {
                reason: r
                    .resource_status_reason
                    .unwrap_or_else(|| r.resource_status.to_string()),
                resource_name: r.resource_name,
            })
            .collect())
    }

    /// Gets the stack, treating `DELETE_COMPLETE` as absent.
    async fn live_record(&self, stack: &str) -> Result<Option<StackRecord>> {
        Ok(self
            .service
            .get_stack(stack)
            .await?
            .filter(|r| r.status != StackStatus::DeleteComplete))
    }

    async fn observe(&self, operation: &StackOperation, started: bool) -> Result<Observation> {
        let Some(record) = self.service.get_stack(&operation.stack).await? else {
            if operation.action == StackAction::Delete {
                return Ok(Observation::picked_up(StackStatus::DeleteComplete, None));
            }
            return Err(StackError::NotFound {
                stack: operation.stack.clone(),
            }
            .into());
        };

        if started || picked_up(operation, &record) {
            return Ok(Observation::picked_up(record.status, record.status_reason));
        }

        debug!(
            "Stack {} still reports {}; {} not started yet",
            operation.stack, record.status, operation.action
        );
        Ok(Observation {
            status: StackStatus::of(operation.action, StackPhase::InProgress),
            reason: None,
            picked_up: false,
        })
    }
}

struct Observation {
    status: StackStatus,
    reason: Option<String>,
    picked_up: bool,
}

impl Observation {
    const fn picked_up(status: StackStatus, reason: Option<String>) -> Self {
        Self {
            status,
            reason,
            picked_up: true,
        }
    }
}

/// Whether a record shows the service working on, or done with, `operation`
/// rather than an earlier one.
fn picked_up(operation: &StackOperation, record: &StackRecord) -> bool {
    if record.status.action() != Some(operation.action) {
        // Unknown statuses cannot be attributed; take them as they come.
        return record.status.action().is_none();
    }
    if record.status.is_in_progress() || operation.previous.as_ref() != Some(&record.status) {
        return true;
    }
    matches!(
        (record.updated_time, operation.previous_updated),
        (Some(now), Some(before)) if now > before
    )
}
