//! Workflow execution types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status of a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionStatus {
    /// Still running.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
    /// Any other status string.
    Unknown(String),
}

impl ExecutionStatus {
    /// Returns true once the execution finished.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns the status string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<String> for ExecutionStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "RUNNING" => Self::Running,
            "SUCCESS" => Self::Success,
            "ERROR" => Self::Error,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<ExecutionStatus> for String {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow execution as reported by the workflow service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    /// Execution identifier.
    pub id: String,
    /// Workflow name.
    #[serde(rename = "workflow_name")]
    pub workflow: String,
    /// Input the execution was started with.
    #[serde(default)]
    pub input: Value,
    /// Current status.
    #[serde(rename = "state")]
    pub status: ExecutionStatus,
    /// Output, filled once the execution finished.
    #[serde(default)]
    pub output: Value,
}

/// Sequence number of client-built messages; the service numbers from 1.
pub const LOCAL_SEQ: u64 = 0;

/// A message emitted by an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMessage {
    /// Sequence number, increasing within one execution. Messages built by
    /// the client rather than listed by the service carry [`LOCAL_SEQ`].
    pub seq: u64,
    /// Message body.
    pub payload: Value,
}

impl WorkflowMessage {
    /// Returns true if the payload carries an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.payload.get("status").and_then(Value::as_str) == Some("FAILED")
            || self.payload.get("error").is_some()
    }

    /// Returns the human readable message, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}

/// Dispatcher-side view of a running execution.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionHandle {
    /// Execution identifier.
    pub execution_id: String,
    /// Workflow name.
    pub workflow: String,
    /// Sequence number of the last delivered message.
    pub cursor: u64,
    /// Last observed status.
    pub status: ExecutionStatus,
    /// Whether an error message was seen or synthesized.
    pub error_reported: bool,
}

impl ExecutionHandle {
    /// Creates a handle for a freshly started execution.
    #[must_use]
    pub fn new(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id.clone(),
            workflow: execution.workflow.clone(),
            cursor: 0,
            status: execution.status.clone(),
            error_reported: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_from_service() {
        let execution: Execution = serde_json::from_value(json!({
            "id": "e1",
            "workflow_name": "tripleo.package_update.v1.update_nodes",
            "state": "PAUSED"
        }))
        .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Unknown(String::from("PAUSED")));
        assert!(!execution.status.is_terminal());
        assert!(execution.output.is_null());
    }

    #[test]
    fn test_error_messages() {
        let failed = WorkflowMessage {
            seq: 3,
            payload: json!({"status": "FAILED", "message": "timeout applying config"}),
        };
        assert!(failed.is_error());
        assert_eq!(failed.text(), Some("timeout applying config"));

        let progress = WorkflowMessage {
            seq: 1,
            payload: json!({"status": "RUNNING", "message": "step 1"}),
        };
        assert!(!progress.is_error());
    }
}
