//! Deployment orchestration.
//!
//! An [`Orchestrator`] turns operator intents (deploy, update, upgrade,
//! fast-forward upgrade, delete, node management) into ordered phases over the
//! plan store, the orchestration service, the provisioning service and the
//! workflow service. Each call yields a [`DeploymentRun`] recording every
//! phase with its outcome.
//!
//! Rolling operations are split into [`Batch`]es according to a [`RunScope`].

mod operations;
mod run;
mod scope;
mod services;

pub use operations::{Lifecycle, Orchestrator};
pub use run::{DeploymentRun, PhaseOutcome, PhaseRecord, ProgressEvent, ProgressSink, RunOutcome};
pub use scope::{
    BATCH_NODES_PARAM, BATCH_ROLES_PARAM, Batch, BatchNode, CONVERGE_PARAM, RunScope,
    plan_batches, whole_overcloud,
};
pub use services::{Services, plan_backend, plan_store};
