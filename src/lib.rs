// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(dead_code)]                   // Unused code is reported
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Overcloud Deploy
//!
//! A phased deployment, update and upgrade orchestrator for multi-node
//! overcloud stacks.
//!
//! ## Overview
//!
//! An overcloud is a set of bare-metal nodes grouped by role (control plane,
//! compute, storage) and described by a stack of templates and parameters.
//! This crate drives four remote services to bring it up and move it between
//! releases:
//!
//! - a plan store holding templates and layered parameters
//! - an orchestration service that turns a plan export into a stack
//! - a provisioning service that manages the node lifecycle
//! - a workflow service that applies configuration on the nodes
//!
//! ## Architecture
//!
//! Every operator intent is a fixed sequence of **phases**. A phase starts
//! only after the previous one reached terminal success; the first failure
//! ends the run and nothing is rolled back. Rolling updates and upgrades run
//! in **batches**, one stack submission plus per-node workflow each.
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`api`]: Shared HTTP transport
//! - [`plan`]: Plan storage (local, S3)
//! - [`stack`]: Stack submission and status polling
//! - [`nodes`]: Node lifecycle fan-out
//! - [`workflow`]: Workflow execution and message streaming
//! - [`orchestrator`]: Phase sequencing and run records
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: overcloud
//!
//! plan:
//!   templates_dir: ./templates
//!   environments: [ ./environments/network.yaml ]
//!   parameters:
//!     ControllerCount: 3
//!
//! services:
//!   orchestration: https://undercloud:13004/v1/admin
//!   provisioning: https://undercloud:13385/v1
//!   workflow: https://undercloud:13989/v2
//!
//! roles:
//!   - { name: Controller, kind: control_plane }
//!   - { name: Compute, kind: compute }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod fanout;
pub mod nodes;
pub mod orchestrator;
pub mod plan;
pub mod poll;
pub mod stack;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{FailureKind, OvercloudError, Result};
pub use orchestrator::{DeploymentRun, Lifecycle, Orchestrator, RunScope, Services};
pub use plan::{PlanSources, PlanStoreClient};
pub use stack::StackClient;
