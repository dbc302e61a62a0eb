//! Plan storage.
//!
//! A plan is a named set of templates plus layered parameters. This module
//! provides:
//! - Plan documents and the merged export handed to the stack service
//! - Template parameter reference checks
//! - The plan store client with local and S3 backends
//! - Loading plan contents from disk

mod client;
mod local;
mod references;
mod s3;
mod sources;
mod store;
mod types;

pub use client::PlanStoreClient;
pub use local::LocalPlanBackend;
pub use s3::S3PlanBackend;
pub use sources::{load_environment, load_templates, PlanSources};
pub use store::{BackendResult, PlanBackend};
pub use types::{
    validate_plan_name, Environment, EnvironmentPosition, Parameters, PlanDocument, PlanExport,
    PlanSummary, Templates,
};
