//! Stack orchestration.
//!
//! [`OrchestrationService`] is the raw remote interface, implemented over HTTP
//! by [`OrchestrationClient`]. [`StackClient`] adds the submission guard,
//! action-aware polling and failure retrieval on top of it.

mod client;
mod manager;
mod types;

pub use client::{OrchestrationClient, OrchestrationService, SERVICE};
pub use manager::StackClient;
pub use types::{
    ResourceFailure, StackAction, StackEvent, StackOperation, StackPhase, StackRecord,
    StackResource, StackStatus, StackSubmission, SubmitMode,
};
