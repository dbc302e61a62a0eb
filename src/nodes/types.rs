//! Node lifecycle types and the transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FailureKind, NodeError, OvercloudError, PollError};

/// Lifecycle state of a bare-metal node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeState {
    /// Not known to the provisioning service.
    Unregistered,
    /// Registered and under management.
    Managed,
    /// Hardware introspection running.
    Inspecting,
    /// Introspected, ready to be provided or cleaned.
    Manageable,
    /// Disk cleaning running.
    Cleaning,
    /// Ready to be deployed.
    Available,
    /// Deployed.
    Active,
    /// The last in-flight transition failed.
    Error,
    /// Any other state string.
    Unknown(String),
}

impl NodeState {
    /// Returns the state string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Managed => "managed",
            Self::Inspecting => "inspecting",
            Self::Manageable => "manageable",
            Self::Cleaning => "cleaning",
            Self::Available => "available",
            Self::Active => "active",
            Self::Error => "error",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<String> for NodeState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "unregistered" => Self::Unregistered,
            "managed" => Self::Managed,
            "inspecting" => Self::Inspecting,
            "manageable" => Self::Manageable,
            "cleaning" => Self::Cleaning,
            "available" => Self::Available,
            "active" => Self::Active,
            "error" => Self::Error,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<NodeState> for String {
    fn from(state: NodeState) -> Self {
        match state {
            NodeState::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node as reported by the provisioning service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Service-side identifier.
    pub id: String,
    /// Node name.
    pub name: String,
    /// Role the node is tagged with.
    #[serde(default)]
    pub role: Option<String>,
    /// Lifecycle state.
    #[serde(rename = "provision_state")]
    pub state: NodeState,
    /// Error reported by the last failed transition.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the provision state last changed.
    #[serde(default)]
    pub provision_updated_at: Option<DateTime<Utc>>,
    /// Introspection and hardware properties.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Registration request for a new node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRegistration {
    /// Node name.
    pub name: String,
    /// Role the node should be tagged with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Driver and hardware properties passed through to the service.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A node lifecycle command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeCommand {
    /// Register and take the node under management.
    Import,
    /// Run hardware introspection.
    Introspect,
    /// Make the node available for deployment.
    Provide,
    /// Clean the node's disks.
    Clean,
}

impl NodeCommand {
    /// Returns the command name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Introspect => "introspect",
            Self::Provide => "provide",
            Self::Clean => "clean",
        }
    }

    /// Returns the provision-state verb sent to the service.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Import => "manage",
            Self::Introspect => "inspect",
            Self::Provide => "provide",
            Self::Clean => "clean",
        }
    }

    /// Returns true if the command may be issued from `state`.
    ///
    /// `error` is accepted by every command but import, which re-issues the
    /// command that originally failed.
    #[must_use]
    pub const fn accepts(self, state: &NodeState) -> bool {
        match self {
            Self::Import => matches!(state, NodeState::Unregistered),
            Self::Introspect => matches!(
                state,
                NodeState::Managed | NodeState::Manageable | NodeState::Error
            ),
            Self::Provide | Self::Clean => {
                matches!(state, NodeState::Manageable | NodeState::Error)
            }
        }
    }

    /// Returns true if the node is already past this command's target.
    #[must_use]
    pub const fn skips(self, state: &NodeState) -> bool {
        matches!(self, Self::Provide) && matches!(state, NodeState::Available | NodeState::Active)
    }

    /// Returns the state the command converges to.
    #[must_use]
    pub const fn target(self) -> NodeState {
        match self {
            Self::Import => NodeState::Managed,
            Self::Introspect => NodeState::Manageable,
            Self::Provide | Self::Clean => NodeState::Available,
        }
    }
}

impl fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a command for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The node reached the command's target state.
    Succeeded,
    /// Nothing to do.
    Skipped {
        /// Why the node was skipped.
        reason: String,
    },
    /// The node did not reach the target state.
    Failed {
        /// Backend error or local reason.
        reason: String,
        /// Failure classification.
        kind: FailureKind,
    },
}

impl NodeOutcome {
    /// Builds a failed outcome from an error.
    #[must_use]
    pub fn from_error(error: &OvercloudError) -> Self {
        let reason = match error {
            OvercloudError::Node(NodeError::TransitionFailed { reason, .. }) => reason.clone(),
            other => other.to_string(),
        };
        Self::Failed {
            reason,
            kind: error.kind().escalated(),
        }
    }

    /// Returns true if the node failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome of one node in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeResult {
    /// Node identifier or name.
    pub node: String,
    /// What happened to it.
    #[serde(flatten)]
    pub outcome: NodeOutcome,
}

/// Per-node outcomes of a fanned-out command, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Command that was fanned out.
    pub command: NodeCommand,
    /// One entry per requested node.
    pub results: Vec<NodeResult>,
}

impl BatchReport {
    /// Returns the failed entries.
    pub fn failures(&self) -> impl Iterator<Item = &NodeResult> {
        self.results.iter().filter(|r| r.outcome.is_failed())
    }

    /// Returns the number of nodes that reached the target state.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == NodeOutcome::Succeeded)
            .count()
    }

    /// Returns true if no node failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Returns the error a failed batch reports, or `None` on success.
    ///
    /// A batch where any node stopped because of cancellation reports the
    /// cancellation.
    #[must_use]
    pub fn error(&self) -> Option<OvercloudError> {
        let failed: Vec<_> = self.failures().collect();
        if failed.is_empty() {
            return None;
        }

        let cancelled = failed.iter().any(|r| {
            matches!(
                r.outcome,
                NodeOutcome::Failed {
                    kind: FailureKind::Cancelled,
                    ..
                }
            )
        });
        if cancelled {
            return Some(
                PollError::Cancelled {
                    what: format!("node {}", self.command),
                }
                .into(),
            );
        }

        let detail = failed
            .iter()
            .map(|r| match &r.outcome {
                NodeOutcome::Failed { reason, .. } => format!("{} ({reason})", r.node),
                _ => r.node.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        Some(
            NodeError::BatchFailed {
                command: self.command.to_string(),
                failed: failed.len(),
                total: self.results.len(),
                detail,
            }
            .into(),
        )
    }
}
