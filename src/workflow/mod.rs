//! Workflow execution.
//!
//! [`WorkflowService`] is the raw remote interface, implemented over HTTP by
//! [`WorkflowClient`]. [`WorkflowDispatcher`] starts executions, polls them and
//! delivers their messages without duplicates. Configuration application on
//! the nodes is one such workflow.

mod client;
mod dispatcher;
mod types;

pub use client::{SERVICE, WorkflowClient, WorkflowService};
pub use dispatcher::WorkflowDispatcher;
pub use types::{Execution, ExecutionHandle, ExecutionStatus, LOCAL_SEQ, WorkflowMessage};
