//! Remote collaborators of the orchestrator.

use std::time::Duration;

use tracing::debug;

use crate::api::ApiClient;
use crate::config::{DeployConfig, PlanBackendKind};
use crate::error::{ConfigError, Result};
use crate::nodes::{self, ProvisioningClient, ProvisioningService};
use crate::plan::{LocalPlanBackend, PlanBackend, PlanStoreClient, S3PlanBackend};
use crate::stack::{self, OrchestrationClient, OrchestrationService};
use crate::workflow::{self, WorkflowClient, WorkflowService};

/// Delay between plan store retries.
const PLAN_STORE_RETRY_DELAY_MS: u64 = 500;

/// The services an orchestrator drives.
pub struct Services {
    /// Plan storage backend.
    pub plans: Box<dyn PlanBackend>,
    /// Stack orchestration service.
    pub orchestration: Box<dyn OrchestrationService>,
    /// Bare-metal provisioning service.
    pub provisioning: Box<dyn ProvisioningService>,
    /// Workflow execution service.
    pub workflow: Box<dyn WorkflowService>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("plans", &self.plans.backend_type())
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Builds the HTTP clients and plan backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be created or the S3 backend has no
    /// bucket.
    pub async fn connect(config: &DeployConfig, token: Option<String>) -> Result<Self> {
        let timeout = config.services.request_timeout();
        let retry = config.retry.policy();
        let api = |service: &'static str, url: &str| -> Result<ApiClient> {
            Ok(ApiClient::with_timeout(service, url, token.clone(), timeout)?.with_retry(retry))
        };

        let orchestration = OrchestrationClient::new(api(stack::SERVICE, &config.services.orchestration)?);
        let provisioning = ProvisioningClient::new(api(nodes::SERVICE, &config.services.provisioning)?);
        let workflow = WorkflowClient::new(api(workflow::SERVICE, &config.services.workflow)?);

        Ok(Self {
            plans: plan_backend(config).await?,
            orchestration: Box::new(orchestration),
            provisioning: Box::new(provisioning),
            workflow: Box::new(workflow),
        })
    }
}

/// Returns the retry delay used by the plan store client.
pub(crate) const fn plan_store_retry_delay() -> Duration {
    Duration::from_millis(PLAN_STORE_RETRY_DELAY_MS)
}

/// Creates a plan store client over the configured backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be created.
pub async fn plan_store(config: &DeployConfig) -> Result<PlanStoreClient<Box<dyn PlanBackend>>> {
    Ok(PlanStoreClient::new(plan_backend(config).await?)
        .with_retries(config.plan_store.retries, plan_store_retry_delay()))
}

/// Creates the configured plan backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be created.
pub async fn plan_backend(config: &DeployConfig) -> Result<Box<dyn PlanBackend>> {
    let store = &config.plan_store;
    let backend: Box<dyn PlanBackend> = match store.backend {
        PlanBackendKind::Local => match &store.path {
            Some(path) => Box::new(LocalPlanBackend::with_base_dir(path.clone())),
            None => Box::new(LocalPlanBackend::new()?),
        },
        PlanBackendKind::S3 => {
            let bucket = store.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation("The s3 plan backend requires a bucket", "plan_store.bucket")
            })?;
            Box::new(
                S3PlanBackend::new(bucket, store.prefix.as_deref(), store.region.as_deref())
                    .await?,
            )
        }
    };
    debug!("Using {} plan backend", backend.backend_type());
    Ok(backend)
}
