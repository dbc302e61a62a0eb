//! Configuration specification types for the deployment orchestrator.
//!
//! This module defines the structs that map to the `overcloud.deploy.yaml`
//! file. Everything except the service endpoints has a default, so a minimal
//! file only names the services.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::api::RetryPolicy;
use crate::plan::Parameters;
use crate::poll::PollSettings;

/// Default stack and plan name.
pub const DEFAULT_STACK_NAME: &str = "overcloud";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Stack configuration.
    #[serde(default)]
    pub stack: StackConfig,
    /// Plan sources and overrides.
    #[serde(default)]
    pub plan: PlanConfig,
    /// Plan storage backend.
    #[serde(default)]
    pub plan_store: PlanStoreConfig,
    /// Remote service endpoints.
    pub services: ServicesConfig,
    /// Poll loop timing.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Transient error retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Fan-out limits.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Roles in deployment order.
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
    /// Named workflows used by the orchestrator.
    #[serde(default)]
    pub workflows: WorkflowsConfig,
    /// Environments merged by the update and upgrade operations.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Stack name.
    #[serde(default = "default_stack_name")]
    pub name: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: default_stack_name(),
        }
    }
}

/// Plan sources and overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanConfig {
    /// Plan name. Defaults to the stack name.
    #[serde(default)]
    pub name: Option<String>,
    /// Directory holding the templates.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// Environment files, applied in order.
    #[serde(default)]
    pub environments: Vec<PathBuf>,
    /// User parameter overrides.
    #[serde(default)]
    pub parameters: Parameters,
    /// Parameters filled with generated passwords when not set elsewhere.
    #[serde(default)]
    pub generated_passwords: Vec<String>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            name: None,
            templates_dir: default_templates_dir(),
            environments: Vec::new(),
            parameters: Parameters::new(),
            generated_passwords: Vec::new(),
        }
    }
}

/// Plan storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStoreConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: PlanBackendKind,
    /// Directory for the local backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// S3 bucket name (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (AWS default chain if unset).
    #[serde(default)]
    pub region: Option<String>,
    /// Retries after a transient backend error.
    #[serde(default = "default_plan_store_retries")]
    pub retries: u32,
}

impl Default for PlanStoreConfig {
    fn default() -> Self {
        Self {
            backend: PlanBackendKind::default(),
            path: None,
            bucket: None,
            prefix: None,
            region: None,
            retries: default_plan_store_retries(),
        }
    }
}

/// Plan storage backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanBackendKind {
    /// One JSON document per plan in a local directory.
    #[default]
    Local,
    /// AWS S3 object storage.
    S3,
}

/// Remote service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicesConfig {
    /// Stack orchestration service base URL.
    pub orchestration: String,
    /// Provisioning service base URL.
    pub provisioning: String,
    /// Workflow execution service base URL.
    pub workflow: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ServicesConfig {
    /// Returns the request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Poll loop timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingConfig {
    /// Seconds between observations.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Maximum seconds to wait for a terminal status.
    #[serde(default = "default_poll_max_wait")]
    pub max_wait_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_wait_secs: default_poll_max_wait(),
        }
    }
}

impl PollingConfig {
    /// Converts to poll settings.
    #[must_use]
    pub const fn settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(self.interval_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

/// Transient error retry policy for the remote services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in milliseconds, multiplied by the attempt number.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Converts to a retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_ms))
    }
}

/// Fan-out limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    /// Maximum per-node requests in flight at once.
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: default_max_parallel_nodes(),
        }
    }
}

/// A deployment role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    /// Role name as used by the templates (e.g. `Controller`).
    pub name: String,
    /// Role kind.
    #[serde(default)]
    pub kind: RoleKind,
}

/// Role kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Control plane services. Upgraded first, never partially by node.
    ControlPlane,
    /// Compute hosts.
    Compute,
    /// Storage hosts.
    Storage,
    /// Anything else.
    #[default]
    Other,
}

impl RoleKind {
    /// Returns true for control plane roles.
    #[must_use]
    pub const fn is_control_plane(self) -> bool {
        matches!(self, Self::ControlPlane)
    }
}

/// Named workflows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowsConfig {
    /// Configuration download and apply workflow, run after deploy and converge.
    #[serde(default)]
    pub config_download: Option<String>,
    /// Per-node minor update workflow.
    #[serde(default = "default_update_workflow")]
    pub update_run: String,
    /// Per-node major upgrade workflow.
    #[serde(default = "default_upgrade_workflow")]
    pub upgrade_run: String,
    /// Per-node fast-forward upgrade workflow.
    #[serde(default = "default_ffwd_workflow")]
    pub ffwd_upgrade_run: String,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            config_download: None,
            update_run: default_update_workflow(),
            upgrade_run: default_upgrade_workflow(),
            ffwd_upgrade_run: default_ffwd_workflow(),
        }
    }
}

/// Environments merged by the lifecycle operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleConfig {
    /// Minor update.
    #[serde(default = "default_update_stage")]
    pub update: LifecycleStageConfig,
    /// Major upgrade.
    #[serde(default = "default_upgrade_stage")]
    pub upgrade: LifecycleStageConfig,
    /// Fast-forward upgrade.
    #[serde(default = "default_ffwd_stage")]
    pub ffwd_upgrade: LifecycleStageConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            update: default_update_stage(),
            upgrade: default_upgrade_stage(),
            ffwd_upgrade: default_ffwd_stage(),
        }
    }
}

/// Environments for one lifecycle operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LifecycleStageConfig {
    /// Environment placed ahead of the user environments by `prepare`.
    #[serde(default)]
    pub prepare_environment: Parameters,
    /// Environment merged by `converge` once the prepare environment is removed.
    #[serde(default)]
    pub converge_environment: Parameters,
    /// Release-skip parameters the staged plan must declare.
    ///
    /// A `null` value only requires the parameter to be set to a non-empty
    /// value; any other value must match exactly.
    #[serde(default)]
    pub release_skip: Parameters,
}

// Default value functions

fn default_stack_name() -> String {
    String::from(DEFAULT_STACK_NAME)
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

const fn default_plan_store_retries() -> u32 {
    1
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    10
}

const fn default_poll_max_wait() -> u64 {
    4 * 60 * 60
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    1000
}

const fn default_max_parallel_nodes() -> usize {
    16
}

fn default_update_workflow() -> String {
    String::from("tripleo.package_update.v1.update_nodes")
}

fn default_upgrade_workflow() -> String {
    String::from("tripleo.package_update.v1.upgrade_nodes")
}

fn default_ffwd_workflow() -> String {
    String::from("tripleo.package_update.v1.ffwd_upgrade_nodes")
}

fn stage(update_type: &str) -> LifecycleStageConfig {
    let mut prepare = Parameters::new();
    prepare.insert(String::from("StackUpdateType"), update_type.into());
    let mut converge = Parameters::new();
    converge.insert(String::from("StackUpdateType"), "".into());
    LifecycleStageConfig {
        prepare_environment: prepare,
        converge_environment: converge,
        release_skip: Parameters::new(),
    }
}

fn default_update_stage() -> LifecycleStageConfig {
    stage("UPDATE")
}

fn default_upgrade_stage() -> LifecycleStageConfig {
    stage("UPGRADE")
}

fn default_ffwd_stage() -> LifecycleStageConfig {
    let mut ffwd = stage("FFWD_UPGRADE");
    ffwd.release_skip
        .insert(String::from("FastForwardUpgradeReleases"), serde_json::Value::Null);
    ffwd
}

impl DeployConfig {
    /// Returns the stack name.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack.name
    }

    /// Returns the plan name, which defaults to the stack name.
    #[must_use]
    pub fn plan_name(&self) -> &str {
        self.plan.name.as_deref().unwrap_or(&self.stack.name)
    }

    /// Returns role names in configuration order.
    #[must_use]
    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }

    /// Returns the configured kind of a role. Unknown roles are [`RoleKind::Other`].
    #[must_use]
    pub fn role_kind(&self, role: &str) -> RoleKind {
        self.roles
            .iter()
            .find(|r| r.name == role)
            .map_or(RoleKind::Other, |r| r.kind)
    }
}
