//! Bare-metal node lifecycle.
//!
//! This module provides:
//! - Node types and the lifecycle transition table
//! - The provisioning service interface and its HTTP client
//! - The controller that fans commands out to many nodes

mod client;
mod controller;
mod types;

pub use client::{ProvisioningClient, ProvisioningService, SERVICE};
pub use controller::NodeLifecycleController;
pub use types::{
    BatchReport, Node, NodeCommand, NodeOutcome, NodeRegistration, NodeResult, NodeState,
};
