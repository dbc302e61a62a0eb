//! Stack orchestration types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::{Parameters, Templates};

/// Mutating stack action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackAction {
    /// Stack creation.
    Create,
    /// Stack update.
    Update,
    /// Stack deletion.
    Delete,
}

impl StackAction {
    /// Returns the upper-case action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for StackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a stack action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackPhase {
    /// The action is running.
    InProgress,
    /// The action finished successfully.
    Complete,
    /// The action failed.
    Failed,
}

/// Stack status as reported by the orchestration service.
///
/// Statuses outside the known set are kept verbatim in [`StackStatus::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StackStatus {
    /// `CREATE_IN_PROGRESS`
    CreateInProgress,
    /// `CREATE_COMPLETE`
    CreateComplete,
    /// `CREATE_FAILED`
    CreateFailed,
    /// `UPDATE_IN_PROGRESS`
    UpdateInProgress,
    /// `UPDATE_COMPLETE`
    UpdateComplete,
    /// `UPDATE_FAILED`
    UpdateFailed,
    /// `DELETE_IN_PROGRESS`
    DeleteInProgress,
    /// `DELETE_COMPLETE`
    DeleteComplete,
    /// `DELETE_FAILED`
    DeleteFailed,
    /// Any other status string.
    Unknown(String),
}

impl StackStatus {
    /// Builds the status for an action and phase.
    #[must_use]
    pub const fn of(action: StackAction, phase: StackPhase) -> Self {
        match (action, phase) {
            (StackAction::Create, StackPhase::InProgress) => Self::CreateInProgress,
            (StackAction::Create, StackPhase::Complete) => Self::CreateComplete,
            (StackAction::Create, StackPhase::Failed) => Self::CreateFailed,
            (StackAction::Update, StackPhase::InProgress) => Self::UpdateInProgress,
            (StackAction::Update, StackPhase::Complete) => Self::UpdateComplete,
            (StackAction::Update, StackPhase::Failed) => Self::UpdateFailed,
            (StackAction::Delete, StackPhase::InProgress) => Self::DeleteInProgress,
            (StackAction::Delete, StackPhase::Complete) => Self::DeleteComplete,
            (StackAction::Delete, StackPhase::Failed) => Self::DeleteFailed,
        }
    }

    /// Returns the action and phase, or `None` for unknown statuses.
    #[must_use]
    pub const fn parts(&self) -> Option<(StackAction, StackPhase)> {
        let parts = match self {
            Self::CreateInProgress => (StackAction::Create, StackPhase::InProgress),
            Self::CreateComplete => (StackAction::Create, StackPhase::Complete),
            Self::CreateFailed => (StackAction::Create, StackPhase::Failed),
            Self::UpdateInProgress => (StackAction::Update, StackPhase::InProgress),
            Self::UpdateComplete => (StackAction::Update, StackPhase::Complete),
            Self::UpdateFailed => (StackAction::Update, StackPhase::Failed),
            Self::DeleteInProgress => (StackAction::Delete, StackPhase::InProgress),
            Self::DeleteComplete => (StackAction::Delete, StackPhase::Complete),
            Self::DeleteFailed => (StackAction::Delete, StackPhase::Failed),
            Self::Unknown(_) => return None,
        };
        Some(parts)
    }

    /// Returns the action this status belongs to.
    #[must_use]
    pub const fn action(&self) -> Option<StackAction> {
        match self.parts() {
            Some((action, _)) => Some(action),
            None => None,
        }
    }

    /// Returns true while a mutation is running.
    ///
    /// Unknown statuses ending in `_IN_PROGRESS` count as running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        match self {
            Self::Unknown(raw) => raw.ends_with("_IN_PROGRESS"),
            known => matches!(known.parts(), Some((_, StackPhase::InProgress))),
        }
    }

    /// Returns true for `*_COMPLETE`.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.parts(), Some((_, StackPhase::Complete)))
    }

    /// Returns true for `*_FAILED`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        match self {
            Self::Unknown(raw) => raw.ends_with("_FAILED"),
            known => matches!(known.parts(), Some((_, StackPhase::Failed))),
        }
    }

    /// Returns true for `*_COMPLETE` and `*_FAILED`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_failed()
    }

    /// Returns the status string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<String> for StackStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "CREATE_FAILED" => Self::CreateFailed,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_FAILED" => Self::UpdateFailed,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "DELETE_FAILED" => Self::DeleteFailed,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<StackStatus> for String {
    fn from(status: StackStatus) -> Self {
        match status {
            StackStatus::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stack as reported by the orchestration service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackRecord {
    /// Stack name.
    #[serde(rename = "stack_name")]
    pub name: String,
    /// Service-side identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Current status.
    #[serde(rename = "stack_status")]
    pub status: StackStatus,
    /// Reason attached to the status.
    #[serde(rename = "stack_status_reason", default)]
    pub status_reason: Option<String>,
    /// Last update time.
    #[serde(default)]
    pub updated_time: Option<DateTime<Utc>>,
}

/// A stack resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackResource {
    /// Logical resource name.
    pub resource_name: String,
    /// Resource type.
    #[serde(default)]
    pub resource_type: Option<String>,
    /// Resource status.
    pub resource_status: StackStatus,
    /// Reason attached to the status.
    #[serde(default)]
    pub resource_status_reason: Option<String>,
    /// Last update time.
    #[serde(default)]
    pub updated_time: Option<DateTime<Utc>>,
}

/// A stack event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackEvent {
    /// Event identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Resource the event is about.
    pub resource_name: String,
    /// Resource status after the event.
    pub resource_status: StackStatus,
    /// Reason attached to the status.
    #[serde(default)]
    pub resource_status_reason: Option<String>,
    /// Event time.
    pub event_time: DateTime<Utc>,
}

/// A failed resource with the reason the backend gave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceFailure {
    /// Logical resource name.
    pub resource_name: String,
    /// Failure reason.
    pub reason: String,
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource_name, self.reason)
    }
}

/// Body of a create or update request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackSubmission {
    /// Stack name.
    pub stack_name: String,
    /// Templates by path.
    pub files: Templates,
    /// Merged parameters.
    pub parameters: Parameters,
    /// Digest of the plan export the submission was built from.
    pub plan_digest: String,
}

/// How `submit` treats an existing or absent stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// The stack must not exist.
    Create,
    /// The stack must exist.
    Update,
    /// Create when absent, update otherwise.
    CreateOrUpdate,
}

/// Handle to a submitted stack operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StackOperation {
    /// Stack name.
    pub stack: String,
    /// Submitted action.
    pub action: StackAction,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Status observed right before submission, if the stack existed.
    pub previous: Option<StackStatus>,
    /// `updated_time` observed right before submission.
    pub previous_updated: Option<DateTime<Utc>>,
    /// False when nothing was submitted (deleting an absent stack).
    pub pending: bool,
}
