//! Error types for the overcloud deployment orchestrator.
//!
//! Every component reports through [`OvercloudError`], which wraps one
//! domain-specific error enum per component. [`OvercloudError::kind`] maps any
//! error onto the failure taxonomy the caller-facing surface exposes
//! ([`FailureKind`]), which in turn drives the process exit status.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::stack::ResourceFailure;

/// The main error type for the overcloud deployment system.
#[derive(Debug, Error)]
pub enum OvercloudError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote service transport errors.
    #[error("Service error: {0}")]
    Api(#[from] ApiError),

    /// Plan storage errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanStoreError),

    /// Stack orchestration errors.
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),

    /// Node lifecycle errors.
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Workflow execution errors.
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Poll loop errors (timeout, cancellation).
    #[error("{0}")]
    Poll(#[from] PollError),

    /// Orchestration-level errors.
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed plan, parameters or request, detected before any remote mutation.
    Validation,
    /// Another mutation is in flight for the same stack.
    Conflict,
    /// A remote operation reached a terminal failure state.
    BackendFailure,
    /// Communication with a remote service failed.
    TransientNetwork,
    /// A poll loop exceeded its maximum wait.
    Timeout,
    /// The operator cancelled while the orchestrator was watching.
    Cancelled,
    /// Local failure unrelated to the remote services.
    Internal,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (role, environment, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Errors returned by the HTTP transport shared by all remote services.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("{service} authentication failed: {message}")]
    AuthenticationFailed {
        /// Service name.
        service: &'static str,
        /// Description of the auth failure.
        message: String,
    },

    /// The requested resource does not exist.
    #[error("{service} resource not found: {resource}")]
    NotFound {
        /// Service name.
        service: &'static str,
        /// Resource path.
        resource: String,
    },

    /// The service rejected the request because of a conflicting operation.
    #[error("{service} reported a conflict: {message}")]
    Conflict {
        /// Service name.
        service: &'static str,
        /// Message returned by the service.
        message: String,
    },

    /// The service rejected the request (4xx).
    #[error("{service} rejected the request: {status} - {message}")]
    Rejected {
        /// Service name.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// Rate limited.
    #[error("{service} rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Service name.
        service: &'static str,
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The service failed to process the request (5xx).
    #[error("{service} server error: {status} - {message}")]
    ServerError {
        /// Service name.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with {service}: {message}")]
    Network {
        /// Service name.
        service: &'static str,
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the service.
    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        /// Service name.
        service: &'static str,
        /// Description of the response issue.
        message: String,
    },
}

/// Plan storage errors.
#[derive(Debug, Error)]
pub enum PlanStoreError {
    /// A plan with this name already exists.
    #[error("Plan already exists: {name}")]
    AlreadyExists {
        /// Plan name.
        name: String,
    },

    /// The plan does not exist.
    #[error("Plan not found: {name}")]
    NotFound {
        /// Plan name.
        name: String,
    },

    /// The plan name is not acceptable.
    #[error("Invalid plan name '{name}': {reason}")]
    InvalidName {
        /// Plan name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// A template could not be parsed.
    #[error("Template {path} in plan {plan} is not valid YAML: {message}")]
    InvalidTemplate {
        /// Plan name.
        plan: String,
        /// Template path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// Template parameter references do not resolve.
    #[error("Plan {plan} has {} unresolved parameter reference(s): {}", .unresolved.len(), .unresolved.join(", "))]
    UnresolvedParameters {
        /// Plan name.
        plan: String,
        /// `template: parameter` pairs that did not resolve.
        unresolved: Vec<String>,
    },

    /// The storage backend failed.
    #[error("{backend} plan backend error: {message}")]
    Backend {
        /// Backend type.
        backend: &'static str,
        /// Description of the failure.
        message: String,
        /// Whether the failure is worth retrying.
        transient: bool,
    },

    /// A stored plan document is unreadable.
    #[error("Plan document is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("Plan serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Stack orchestration errors.
#[derive(Debug, Error)]
pub enum StackError {
    /// A mutating operation is already in flight.
    #[error("Stack {stack} is busy ({status}); refusing to submit another mutation")]
    Conflict {
        /// Stack name.
        stack: String,
        /// Status observed before submission.
        status: String,
    },

    /// The stack does not exist.
    #[error("Stack not found: {stack}")]
    NotFound {
        /// Stack name.
        stack: String,
    },

    /// The stack operation reached a failed terminal status.
    #[error("Stack {stack} reached {status}{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Failed {
        /// Stack name.
        stack: String,
        /// Terminal status.
        status: String,
        /// Status reason reported by the backend.
        reason: Option<String>,
        /// Failed resources, oldest first.
        failures: Vec<ResourceFailure>,
    },
}

/// Node lifecycle errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node does not exist.
    #[error("Node not found: {node}")]
    NotFound {
        /// Node identifier.
        node: String,
    },

    /// The command is not allowed from the node's current state.
    #[error("Cannot {command} node {node} from state {state}")]
    InvalidTransition {
        /// Node identifier.
        node: String,
        /// Command attempted.
        command: String,
        /// Current state.
        state: String,
    },

    /// The backend moved the node into the error state.
    #[error("Node {node} failed in state {state}: {reason}")]
    TransitionFailed {
        /// Node identifier.
        node: String,
        /// State observed.
        state: String,
        /// Last error reported by the backend.
        reason: String,
    },

    /// At least one node of a batch failed.
    #[error("{command} failed for {failed} of {total} node(s): {detail}")]
    BatchFailed {
        /// Command that was fanned out.
        command: String,
        /// Number of failed nodes.
        failed: usize,
        /// Number of nodes in the batch.
        total: usize,
        /// Per-node failure detail.
        detail: String,
    },
}

/// Workflow execution errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The execution finished in the error state.
    #[error("Workflow {workflow} (execution {execution}) failed: {payload}")]
    ExecutionFailed {
        /// Workflow name.
        workflow: String,
        /// Execution identifier.
        execution: String,
        /// Structured error payload.
        payload: serde_json::Value,
    },
}

/// Errors raised by poll loops.
#[derive(Debug, Error)]
pub enum PollError {
    /// The maximum wait elapsed before a terminal status was observed.
    #[error("Timed out after {waited_secs}s waiting for {what}")]
    Timeout {
        /// What was being watched.
        what: String,
        /// Seconds spent watching.
        waited_secs: u64,
    },

    /// The operator cancelled the wait. The remote operation keeps running.
    #[error("Stopped watching {what}: cancelled by operator (remote status unknown)")]
    Cancelled {
        /// What was being watched.
        what: String,
    },
}

/// Orchestration-level errors.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The staged plan does not declare the release-skip parameters.
    #[error("Invalid upgrade path: {reason}")]
    InvalidUpgradePath {
        /// Why the upgrade path was rejected.
        reason: String,
    },

    /// The requested run scope is not acceptable.
    #[error("Invalid run scope: {reason}")]
    InvalidScope {
        /// Why the scope was rejected.
        reason: String,
    },

    /// A batch finished with failed nodes.
    #[error("Batch {batch} failed on {} node(s): {}", .failures.len(), .failures.iter().map(|(n, r)| format!("{n} ({r})")).collect::<Vec<_>>().join(", "))]
    BatchFailed {
        /// Batch label.
        batch: String,
        /// Failed nodes with their reason.
        failures: Vec<(String, String)>,
    },
}

/// Result type alias for overcloud operations.
pub type Result<T> = std::result::Result<T, OvercloudError>;

impl OvercloudError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Maps this error onto the caller-facing failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) => FailureKind::Validation,
            Self::Api(e) => e.kind(),
            Self::Plan(e) => e.kind(),
            Self::Stack(e) => match e {
                StackError::Conflict { .. } => FailureKind::Conflict,
                StackError::NotFound { .. } => FailureKind::Validation,
                StackError::Failed { .. } => FailureKind::BackendFailure,
            },
            Self::Node(e) => match e {
                NodeError::NotFound { .. } | NodeError::InvalidTransition { .. } => {
                    FailureKind::Validation
                }
                NodeError::TransitionFailed { .. } | NodeError::BatchFailed { .. } => {
                    FailureKind::BackendFailure
                }
            },
            Self::Workflow(_) => FailureKind::BackendFailure,
            Self::Poll(e) => match e {
                PollError::Timeout { .. } => FailureKind::Timeout,
                PollError::Cancelled { .. } => FailureKind::Cancelled,
            },
            Self::Orchestration(e) => match e {
                OrchestrationError::InvalidUpgradePath { .. }
                | OrchestrationError::InvalidScope { .. } => FailureKind::Validation,
                OrchestrationError::BatchFailed { .. } => FailureKind::BackendFailure,
            },
            Self::Io(_) | Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::Plan(PlanStoreError::Backend { transient, .. }) => *transient,
            _ => false,
        }
    }

    /// Returns the suggested retry delay, if applicable.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Api(ApiError::RateLimited {
                retry_after_secs, ..
            }) => Some(Duration::from_secs(*retry_after_secs)),
            Self::Api(ApiError::Network { .. } | ApiError::ServerError { .. }) => {
                Some(Duration::from_secs(5))
            }
            Self::Plan(PlanStoreError::Backend {
                transient: true, ..
            }) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Returns the failed resources carried by a stack failure, if any.
    #[must_use]
    pub fn resource_failures(&self) -> &[ResourceFailure] {
        match self {
            Self::Stack(StackError::Failed { failures, .. }) => failures,
            _ => &[],
        }
    }
}

impl FailureKind {
    /// Returns the process exit status for this kind of failure.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Validation => 2,
            Self::Conflict => 3,
            Self::BackendFailure | Self::TransientNetwork => 4,
            Self::Timeout => 5,
            Self::Cancelled => 6,
            Self::Internal => 1,
        }
    }

    /// Returns the kind reported at the end of a run.
    ///
    /// Transient errors that survived the component's retries are reported as
    /// backend failures.
    #[must_use]
    pub const fn escalated(self) -> Self {
        match self {
            Self::TransientNetwork => Self::BackendFailure,
            other => other,
        }
    }

    /// Returns a short lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::BackendFailure => "backend_failure",
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ApiError {
    /// Creates a network error.
    #[must_use]
    pub fn network(service: &'static str, message: impl Into<String>) -> Self {
        Self::Network {
            service,
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            message: message.into(),
        }
    }

    /// Returns true for failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::ServerError { .. } | Self::RateLimited { .. }
        )
    }

    /// Returns true for rejections of the request itself (4xx class).
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::NotFound { .. }
                | Self::Conflict { .. }
                | Self::Rejected { .. }
        )
    }

    /// Maps this error onto the failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Conflict { .. } => FailureKind::Conflict,
            Self::Network { .. } | Self::ServerError { .. } | Self::RateLimited { .. } => {
                FailureKind::TransientNetwork
            }
            Self::AuthenticationFailed { .. }
            | Self::NotFound { .. }
            | Self::Rejected { .. }
            | Self::InvalidResponse { .. } => FailureKind::BackendFailure,
        }
    }
}

impl PlanStoreError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(backend: &'static str, message: impl Into<String>, transient: bool) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
            transient,
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Maps this error onto the failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::AlreadyExists { .. }
            | Self::NotFound { .. }
            | Self::InvalidName { .. }
            | Self::InvalidTemplate { .. }
            | Self::UnresolvedParameters { .. } => FailureKind::Validation,
            Self::Backend {
                transient: true, ..
            } => FailureKind::TransientNetwork,
            Self::Backend { .. } | Self::Corrupted { .. } | Self::SerializationError { .. } => {
                FailureKind::BackendFailure
            }
        }
    }
}
