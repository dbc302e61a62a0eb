//! Workflow dispatcher: start, poll and stream execution messages.

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Result, WorkflowError};
use crate::poll::Poller;

use super::client::WorkflowService;
use super::types::{ExecutionHandle, ExecutionStatus, LOCAL_SEQ, WorkflowMessage};

/// Runs workflows and delivers their messages exactly once, in order.
#[derive(Debug)]
pub struct WorkflowDispatcher<W> {
    service: W,
}

impl<W: WorkflowService> WorkflowDispatcher<W> {
    /// Creates a dispatcher.
    #[must_use]
    pub const fn new(service: W) -> Self {
        Self { service }
    }

    /// Returns the workflow service.
    #[must_use]
    pub const fn service(&self) -> &W {
        &self.service
    }

    /// Starts an execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the service refuses the execution.
    pub async fn run(&self, workflow: &str, input: Value) -> Result<ExecutionHandle> {
        let execution = self.service.start_execution(workflow, &input).await?;
        info!("Started workflow {workflow} (execution {})", execution.id);
        Ok(ExecutionHandle::new(&execution))
    }

    /// Observes the execution once and returns its status and the messages
    /// not delivered yet.
    ///
    /// An execution that ended in error without reporting an error message gets
    /// a synthesized one built from its output. It carries [`LOCAL_SEQ`] and
    /// leaves the cursor alone, so messages the service lists later still
    /// arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached.
    pub async fn poll(
        &self,
        handle: &mut ExecutionHandle,
    ) -> Result<(ExecutionStatus, Vec<WorkflowMessage>)> {
        // Status first: messages listed afterwards include everything emitted
        // before a terminal status.
        let execution = self.service.get_execution(&handle.execution_id).await?;
        let messages = self
            .service
            .list_messages(&handle.execution_id, handle.cursor)
            .await?;

        let mut fresh = Vec::with_capacity(messages.len());
        for message in messages {
            if message.seq <= handle.cursor {
                debug!(
                    "Dropping duplicate message {} of execution {}",
                    message.seq, handle.execution_id
                );
                continue;
            }
            handle.cursor = message.seq;
            handle.error_reported |= message.is_error();
            fresh.push(message);
        }

        if execution.status == ExecutionStatus::Error && !handle.error_reported {
            handle.error_reported = true;
            fresh.push(WorkflowMessage {
                seq: LOCAL_SEQ,
                payload: synthesized_error(&handle.workflow, &execution.id, &execution.output),
            });
        }

        handle.status = execution.status.clone();
        Ok((execution.status, fresh))
    }

    /// Polls until the execution finishes, passing every new message to `sink`.
    ///
    /// Returns all messages delivered while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ExecutionFailed`] with the error payload if the
    /// execution failed, or the poll error on timeout or cancellation.
    pub async fn wait<F>(
        &self,
        handle: &mut ExecutionHandle,
        poller: &Poller,
        mut sink: F,
    ) -> Result<Vec<WorkflowMessage>>
    where
        F: FnMut(&WorkflowMessage) + Send,
    {
        let window = poller.start(format!(
            "workflow {} (execution {})",
            handle.workflow, handle.execution_id
        ));
        let mut delivered = Vec::new();

        loop {
            let (status, messages) = window.observe(self.poll(handle)).await?;
            for message in &messages {
                sink(message);
            }
            delivered.extend(messages);

            match status {
                ExecutionStatus::Success => {
                    info!(
                        "Workflow {} (execution {}) succeeded",
                        handle.workflow, handle.execution_id
                    );
                    return Ok(delivered);
                }
                ExecutionStatus::Error => {
                    let payload = delivered
                        .iter()
                        .rev()
                        .find(|m| m.is_error())
                        .map_or(Value::Null, |m| m.payload.clone());
                    warn!(
                        "Workflow {} (execution {}) failed",
                        handle.workflow, handle.execution_id
                    );
                    return Err(WorkflowError::ExecutionFailed {
                        workflow: handle.workflow.clone(),
                        execution: handle.execution_id.clone(),
                        payload,
                    }
                    .into());
                }
                _ => window.wait_next().await?,
            }
        }
    }
}

fn synthesized_error(workflow: &str, execution: &str, output: &Value) -> Value {
    let message = output
        .get("message")
        .or_else(|| output.get("result"))
        .and_then(Value::as_str)
        .map_or_else(|| format!("Workflow {workflow} failed"), str::to_string);

    json!({
        "status": "FAILED",
        "message": message,
        "execution": execution,
        "output": output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, OvercloudError};
    use crate::poll::PollSettings;
    use crate::testing::FakeWorkflow;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn poller() -> Poller {
        Poller::new(
            PollSettings::new(Duration::from_millis(2), Duration::from_millis(500)),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_messages_are_delivered_once_in_order() {
        let fake = FakeWorkflow::new();
        let dispatcher = WorkflowDispatcher::new(fake.clone());

        let mut handle = dispatcher
            .run("deploy", json!({"stack": "overcloud"}))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let delivered = dispatcher
            .wait(&mut handle, &poller(), |m| seen.push(m.seq))
            .await
            .unwrap();

        let seqs: Vec<_> = delivered.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, seen);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(handle.status, ExecutionStatus::Success);
        assert_eq!(handle.cursor, *seqs.last().unwrap());
    }

    #[tokio::test]
    async fn test_failure_carries_error_payload() {
        let fake = FakeWorkflow::new();
        fake.fail_when("N3", "timeout applying config");
        let dispatcher = WorkflowDispatcher::new(fake.clone());

        let mut handle = dispatcher
            .run("update_nodes", json!({"node": "N3"}))
            .await
            .unwrap();
        let err = dispatcher
            .wait(&mut handle, &poller(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::BackendFailure);
        match err {
            OvercloudError::Workflow(WorkflowError::ExecutionFailed { payload, .. }) => {
                assert_eq!(payload["message"], "timeout applying config");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_silent_failure_gets_synthesized_message() {
        let fake = FakeWorkflow::new();
        fake.fail_silently_when("deploy", json!({"result": "ansible exited with 2"}));
        let dispatcher = WorkflowDispatcher::new(fake.clone());

        let mut handle = dispatcher.run("deploy", json!({})).await.unwrap();
        let mut last = None;
        let err = dispatcher
            .wait(&mut handle, &poller(), |m| last = Some(m.clone()))
            .await
            .unwrap_err();

        let last = last.unwrap();
        assert!(last.is_error());
        assert_eq!(last.text(), Some("ansible exited with 2"));
        assert!(err.to_string().contains("ansible exited with 2"));
    }

    #[tokio::test]
    async fn test_late_message_after_synthesized_error_is_delivered() {
        let fake = FakeWorkflow::new();
        fake.fail_silently_when("deploy", json!({"result": "ansible exited with 2"}));
        let dispatcher = WorkflowDispatcher::new(fake.clone());

        let mut handle = dispatcher.run("deploy", json!({})).await.unwrap();
        let mut seen = Vec::new();
        dispatcher
            .wait(&mut handle, &poller(), |m| seen.push(m.seq))
            .await
            .unwrap_err();
        assert_eq!(seen, [1, LOCAL_SEQ]);
        assert_eq!(handle.cursor, 1);

        fake.flush_late(&handle.execution_id, json!({"message": "log flushed"}));
        let (_, messages) = dispatcher.poll(&mut handle).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].seq, 2);
        assert_eq!(messages[0].text(), Some("log flushed"));
        assert_eq!(handle.cursor, 2);
    }

    #[tokio::test]
    async fn test_poll_after_terminal_delivers_nothing_new() {
        let fake = FakeWorkflow::new();
        fake.fail_silently_when("deploy", Value::Null);
        let dispatcher = WorkflowDispatcher::new(fake.clone());

        let mut handle = dispatcher.run("deploy", json!({})).await.unwrap();
        dispatcher
            .wait(&mut handle, &poller(), |_| {})
            .await
            .unwrap_err();

        let (status, messages) = dispatcher.poll(&mut handle).await.unwrap();
        assert_eq!(status, ExecutionStatus::Error);
        assert!(messages.is_empty());
    }
}
