//! Deployment orchestrator.
//!
//! Every public operation is a fixed sequence of phases. A phase starts only
//! after the previous one reached terminal success; the first failure ends the
//! run and nothing is rolled back. Each operation returns a [`DeploymentRun`]
//! describing what happened, whatever the outcome.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConfigHasher, DeployConfig, LifecycleStageConfig};
use crate::error::{
    FailureKind, OrchestrationError, OvercloudError, PlanStoreError, PollError, Result,
    WorkflowError,
};
use crate::fanout::BoundedTaskSet;
use crate::nodes::{
    BatchReport, NodeCommand, NodeLifecycleController, NodeOutcome, NodeRegistration, NodeResult,
    ProvisioningService,
};
use crate::plan::{
    Environment, EnvironmentPosition, Parameters, PlanBackend, PlanDocument, PlanExport,
    PlanSources, PlanStoreClient, Templates,
};
use crate::poll::Poller;
use crate::stack::{OrchestrationService, StackClient, StackOperation, SubmitMode};
use crate::workflow::{WorkflowDispatcher, WorkflowService};

use super::run::{DeploymentRun, ProgressEvent, ProgressSink, RunRecorder};
use super::scope::{self, Batch, CONVERGE_PARAM, RunScope};
use super::services::{Services, plan_store_retry_delay};

/// Prefix of the environments lifecycle operations add to the plan.
const LIFECYCLE_ENV_PREFIX: &str = "lifecycle/";

/// Operations sharing the prepare, run and converge shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Minor update.
    Update,
    /// Major upgrade.
    Upgrade,
    /// Upgrade skipping intermediate releases.
    FfwdUpgrade,
}

impl Lifecycle {
    /// Returns the operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Upgrade => "upgrade",
            Self::FfwdUpgrade => "ffwd-upgrade",
        }
    }

    const fn stage(self, config: &DeployConfig) -> &LifecycleStageConfig {
        match self {
            Self::Update => &config.lifecycle.update,
            Self::Upgrade => &config.lifecycle.upgrade,
            Self::FfwdUpgrade => &config.lifecycle.ffwd_upgrade,
        }
    }

    fn workflow(self, config: &DeployConfig) -> &str {
        match self {
            Self::Update => &config.workflows.update_run,
            Self::Upgrade => &config.workflows.upgrade_run,
            Self::FfwdUpgrade => &config.workflows.ffwd_upgrade_run,
        }
    }

    /// Upgrades move the control plane before anything else.
    const fn control_plane_first(self) -> bool {
        !matches!(self, Self::Update)
    }

    /// Name of the environment `prepare` adds to the plan.
    #[must_use]
    pub fn prepare_environment(self) -> String {
        format!("{LIFECYCLE_ENV_PREFIX}{}-prepare", self.as_str())
    }

    /// Name of the environment `converge` adds to the plan.
    #[must_use]
    pub fn converge_environment(self) -> String {
        format!("{LIFECYCLE_ENV_PREFIX}{}-converge", self.as_str())
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type Dispatcher = WorkflowDispatcher<Box<dyn WorkflowService>>;

/// Sequences plan, stack, node and workflow operations into named runs.
pub struct Orchestrator {
    config: DeployConfig,
    config_hash: String,
    plans: PlanStoreClient<Box<dyn PlanBackend>>,
    stacks: StackClient<Box<dyn OrchestrationService>>,
    nodes: NodeLifecycleController<Box<dyn ProvisioningService>>,
    workflows: Arc<Dispatcher>,
    poller: Poller,
    progress: ProgressSink,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stack", &self.config.stack_name())
            .field("plan", &self.config.plan_name())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator polling with the configured timings.
    #[must_use]
    pub fn new(config: DeployConfig, services: Services, cancel: CancellationToken) -> Self {
        let poller = Poller::new(config.polling.settings(), cancel);
        Self::with_poller(config, services, poller)
    }

    /// Creates an orchestrator with an explicit poller.
    #[must_use]
    pub fn with_poller(config: DeployConfig, services: Services, poller: Poller) -> Self {
        let plans = PlanStoreClient::new(services.plans)
            .with_retries(config.plan_store.retries, plan_store_retry_delay());
        let nodes = NodeLifecycleController::new(Arc::new(services.provisioning), poller.clone())
            .with_max_parallel(config.concurrency.max_parallel_nodes);

        Self {
            config_hash: ConfigHasher::new().hash_config(&config),
            plans,
            stacks: StackClient::new(services.orchestration),
            nodes,
            workflows: Arc::new(WorkflowDispatcher::new(services.workflow)),
            poller,
            progress: ProgressSink::default(),
            config,
        }
    }

    /// Streams progress events to `sender`.
    #[must_use]
    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = ProgressSink::new(sender);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Returns the plan store client.
    #[must_use]
    pub const fn plans(&self) -> &PlanStoreClient<Box<dyn PlanBackend>> {
        &self.plans
    }

    /// Returns the stack client.
    #[must_use]
    pub const fn stacks(&self) -> &StackClient<Box<dyn OrchestrationService>> {
        &self.stacks
    }

    /// Returns the node lifecycle controller.
    #[must_use]
    pub const fn nodes(&self) -> &NodeLifecycleController<Box<dyn ProvisioningService>> {
        &self.nodes
    }

    /// Stages the plan, creates or updates the stack and waits for it, then
    /// runs the configuration download workflow if one is configured.
    pub async fn deploy(&self, sources: &PlanSources) -> DeploymentRun {
        let mut run = self.recorder("deploy");
        let result = self.deploy_phases(&mut run, sources).await;
        run.finish(result)
    }

    async fn deploy_phases(&self, run: &mut RunRecorder, sources: &PlanSources) -> Result<()> {
        let export = run
            .phase("plan-stage", None, self.stage_plan(sources, None, &Parameters::new()))
            .await?;
        let operation = run
            .phase(
                "stack-submit",
                None,
                self.stacks.submit(
                    self.config.stack_name(),
                    &export,
                    SubmitMode::CreateOrUpdate,
                    &Parameters::new(),
                ),
            )
            .await?;
        self.poll_stack(run, &operation, None).await?;
        self.config_download(run).await
    }

    /// Stages the plan for a lifecycle operation without touching the stack.
    ///
    /// A fast-forward upgrade first checks that the staged parameters declare
    /// the configured release-skip values.
    pub async fn prepare(
        &self,
        lifecycle: Lifecycle,
        sources: &PlanSources,
        delta: &Parameters,
    ) -> DeploymentRun {
        let mut run = self.recorder(&format!("{lifecycle} prepare"));
        let result = self.prepare_phases(&mut run, lifecycle, sources, delta).await;
        run.finish(result)
    }

    async fn prepare_phases(
        &self,
        run: &mut RunRecorder,
        lifecycle: Lifecycle,
        sources: &PlanSources,
        delta: &Parameters,
    ) -> Result<()> {
        let environment = Environment::new(
            lifecycle.prepare_environment(),
            lifecycle.stage(&self.config).prepare_environment.clone(),
        );

        if lifecycle == Lifecycle::FfwdUpgrade {
            run.phase(
                "upgrade-path-validate",
                None,
                self.validate_upgrade_path(sources, &environment, delta),
            )
            .await?;
        }

        let export = run
            .phase(
                "plan-stage",
                None,
                self.stage_plan(sources, Some(environment), delta),
            )
            .await?;
        run.note(format!("plan digest {}", short_digest(&export)));
        Ok(())
    }

    /// Rolls the staged plan out batch by batch.
    ///
    /// Each batch is an independent stack update followed by the per-node
    /// workflow. A failed batch stops the run; earlier batches stay applied.
    /// Fast-forward upgrades always run on the whole overcloud.
    pub async fn run(&self, lifecycle: Lifecycle, scope: &RunScope) -> DeploymentRun {
        let mut run = self.recorder(&format!("{lifecycle} run"));
        let result = self.run_phases(&mut run, lifecycle, scope).await;
        run.finish(result)
    }

    async fn run_phases(
        &self,
        run: &mut RunRecorder,
        lifecycle: Lifecycle,
        scope: &RunScope,
    ) -> Result<()> {
        let batches = run
            .phase("batch-plan", None, self.plan_batches(lifecycle, scope))
            .await?;
        run.note(
            batches
                .iter()
                .map(|b| b.label.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
        );

        let workflow = lifecycle.workflow(&self.config);
        for batch in &batches {
            self.run_batch(run, workflow, batch).await?;
        }
        Ok(())
    }

    async fn run_batch(&self, run: &mut RunRecorder, workflow: &str, batch: &Batch) -> Result<()> {
        let label = Some(batch.label.as_str());

        let operation = run
            .phase(
                "stack-submit",
                label,
                self.submit_update(&batch.parameters()),
            )
            .await?;
        self.poll_stack(run, &operation, label).await?;

        let results = run
            .phase("node-apply", label, async {
                Ok(self.apply_nodes(workflow, batch).await)
            })
            .await?;

        let cancelled = results.iter().any(|r| {
            matches!(
                r.outcome,
                NodeOutcome::Failed {
                    kind: FailureKind::Cancelled,
                    ..
                }
            )
        });
        let failures: Vec<(String, String)> = results
            .iter()
            .filter_map(|r| match &r.outcome {
                NodeOutcome::Failed { reason, .. } => Some((r.node.clone(), reason.clone())),
                _ => None,
            })
            .collect();
        run.note(format!(
            "{} of {} node(s) applied",
            results.len() - failures.len(),
            results.len()
        ));
        run.attach_nodes(results);

        if cancelled {
            return Err(run.fail_last(
                PollError::Cancelled {
                    what: format!("{workflow} on batch {}", batch.label),
                }
                .into(),
            ));
        }
        if !failures.is_empty() {
            return Err(run.fail_last(
                OrchestrationError::BatchFailed {
                    batch: batch.label.clone(),
                    failures,
                }
                .into(),
            ));
        }
        Ok(())
    }

    /// Reconciles the whole overcloud with the final plan.
    pub async fn converge(&self, lifecycle: Lifecycle) -> DeploymentRun {
        let mut run = self.recorder(&format!("{lifecycle} converge"));
        let result = self.converge_phases(&mut run, lifecycle).await;
        run.finish(result)
    }

    async fn converge_phases(&self, run: &mut RunRecorder, lifecycle: Lifecycle) -> Result<()> {
        let export = run
            .phase("plan-stage", None, self.stage_converge(lifecycle))
            .await?;

        let mut extra = Parameters::new();
        extra.insert(CONVERGE_PARAM.to_string(), json!(true));
        let operation = run
            .phase(
                "stack-submit",
                None,
                self.stacks
                    .submit(self.config.stack_name(), &export, SubmitMode::Update, &extra),
            )
            .await?;
        self.poll_stack(run, &operation, None).await?;
        self.config_download(run).await
    }

    /// Deletes the stack and waits until it is gone. The plan is kept.
    pub async fn delete(&self) -> DeploymentRun {
        let mut run = self.recorder("delete");
        let result = async {
            let operation = run
                .phase("stack-delete", None, self.stacks.delete(self.config.stack_name()))
                .await?;
            if !operation.pending {
                run.note("stack already absent");
            }
            self.poll_stack(&mut run, &operation, None).await
        }
        .await;
        run.finish(result)
    }

    /// Registers nodes and takes them under management.
    pub async fn import_nodes(&self, registrations: Vec<NodeRegistration>) -> DeploymentRun {
        self.node_operation(NodeCommand::Import, self.nodes.import(registrations))
            .await
    }

    /// Introspects nodes.
    pub async fn introspect_nodes(&self, ids: &[String]) -> DeploymentRun {
        self.node_operation(NodeCommand::Introspect, async {
            Ok(self.nodes.introspect(ids).await)
        })
        .await
    }

    /// Makes nodes available for deployment.
    pub async fn provide_nodes(&self, ids: &[String]) -> DeploymentRun {
        self.node_operation(NodeCommand::Provide, async {
            Ok(self.nodes.provide(ids).await)
        })
        .await
    }

    /// Cleans nodes.
    pub async fn clean_nodes(&self, ids: &[String]) -> DeploymentRun {
        self.node_operation(NodeCommand::Clean, async {
            Ok(self.nodes.clean(ids).await)
        })
        .await
    }

    async fn node_operation<Fut>(&self, command: NodeCommand, work: Fut) -> DeploymentRun
    where
        Fut: Future<Output = Result<BatchReport>>,
    {
        let mut run = self.recorder(&format!("node {command}"));
        let result = match run.phase(&format!("node-{command}"), None, work).await {
            Ok(report) => {
                for result in &report.results {
                    run.progress().emit(ProgressEvent::NodeOutcome {
                        node: result.node.clone(),
                        outcome: result.outcome.clone(),
                    });
                }
                let error = report.error();
                run.note(format!(
                    "{} of {} node(s) succeeded",
                    report.succeeded(),
                    report.results.len()
                ));
                run.attach_nodes(report.results);
                error.map_or(Ok(()), |e| Err(run.fail_last(e)))
            }
            Err(e) => Err(e),
        };
        run.finish(result)
    }

    fn recorder(&self, operation: &str) -> RunRecorder {
        let mut run =
            DeploymentRun::new(operation, self.config.plan_name(), self.config.stack_name());
        run.config_hash = Some(ConfigHasher::new().short_hash(&self.config_hash));
        RunRecorder::new(run, self.progress.clone())
    }

    /// Writes the plan sources, optional lifecycle environment and delta into
    /// the plan store, fills missing passwords and validates the result.
    async fn stage_plan(
        &self,
        sources: &PlanSources,
        lifecycle: Option<Environment>,
        delta: &Parameters,
    ) -> Result<PlanExport> {
        let name = self.config.plan_name();
        let templates = sources.templates.clone();
        let parameters = self.config.plan.parameters.clone();

        if self.plans.plan_exists(name).await? {
            let plan = self.plans.replace_contents(name, templates, parameters).await?;
            for stale in plan
                .environments
                .iter()
                .filter(|e| e.name.starts_with(LIFECYCLE_ENV_PREFIX))
            {
                self.plans.remove_environment(name, &stale.name).await?;
            }
        } else {
            self.plans.create_plan(name, templates, parameters).await?;
        }

        for environment in &sources.environments {
            self.plans.merge_environment(name, environment.clone()).await?;
        }
        if let Some(environment) = lifecycle {
            self.plans.prepend_environment(name, environment).await?;
        }
        if !delta.is_empty() {
            self.plans.update_parameters(name, delta.clone()).await?;
        }

        let generated = self
            .plans
            .generate_passwords(name, &self.config.plan.generated_passwords)
            .await?;
        if !generated.is_empty() {
            debug!("Generated values for {}", generated.join(", "));
        }

        self.plans.validate_plan(name).await
    }

    async fn stage_converge(&self, lifecycle: Lifecycle) -> Result<PlanExport> {
        let name = self.config.plan_name();
        self.plans
            .remove_environment(name, &lifecycle.prepare_environment())
            .await?;
        self.plans
            .merge_environment(
                name,
                Environment::new(
                    lifecycle.converge_environment(),
                    lifecycle.stage(&self.config).converge_environment.clone(),
                ),
            )
            .await?;
        self.plans.validate_plan(name).await
    }

    /// Checks the release-skip parameters against the plan as `prepare` would
    /// stage it, without writing anything.
    async fn validate_upgrade_path(
        &self,
        sources: &PlanSources,
        environment: &Environment,
        delta: &Parameters,
    ) -> Result<()> {
        let name = self.config.plan_name();
        let mut preview = match self.plans.get_plan(name).await {
            Ok(plan) => plan,
            Err(OvercloudError::Plan(PlanStoreError::NotFound { .. })) => {
                PlanDocument::new(name, Templates::new(), Parameters::new())
            }
            Err(e) => return Err(e),
        };

        preview.replace_parameters(self.config.plan.parameters.clone());
        preview
            .environments
            .retain(|e| !e.name.starts_with(LIFECYCLE_ENV_PREFIX));
        for source in &sources.environments {
            preview.upsert_environment(source.clone(), EnvironmentPosition::Last);
        }
        preview.upsert_environment(environment.clone(), EnvironmentPosition::First);
        preview.apply_parameters(delta.clone());

        check_release_skip(
            &Lifecycle::FfwdUpgrade.stage(&self.config).release_skip,
            &preview.merged_parameters(),
        )
    }

    async fn plan_batches(&self, lifecycle: Lifecycle, scope: &RunScope) -> Result<Vec<Batch>> {
        let node_roles = self.nodes.node_roles().await?;
        if lifecycle == Lifecycle::FfwdUpgrade {
            if *scope != RunScope::All {
                info!("ffwd-upgrade run ignores the requested scope and runs on the whole overcloud");
            }
            return Ok(vec![scope::whole_overcloud(&self.config, &node_roles)?]);
        }
        scope::plan_batches(
            &self.config,
            &node_roles,
            scope,
            lifecycle.control_plane_first(),
        )
    }

    async fn submit_update(&self, extra: &Parameters) -> Result<StackOperation> {
        let export = self.plans.validate_plan(self.config.plan_name()).await?;
        self.stacks
            .submit(self.config.stack_name(), &export, SubmitMode::Update, extra)
            .await
    }

    async fn poll_stack(
        &self,
        run: &mut RunRecorder,
        operation: &StackOperation,
        batch: Option<&str>,
    ) -> Result<()> {
        let status = run
            .phase("poll", batch, self.stacks.wait(operation, &self.poller))
            .await?;
        run.note(status.to_string());
        run.progress().emit(ProgressEvent::StackStatus {
            stack: operation.stack.clone(),
            status,
        });
        Ok(())
    }

    async fn config_download(&self, run: &mut RunRecorder) -> Result<()> {
        let Some(workflow) = self.config.workflows.config_download.as_deref() else {
            return Ok(());
        };

        let input = json!({
            "stack": self.config.stack_name(),
            "plan": self.config.plan_name(),
        });
        let progress = run.progress().clone();
        let messages = run
            .phase("config-download", None, async {
                let mut handle = self.workflows.run(workflow, input).await?;
                self.workflows
                    .wait(&mut handle, &self.poller, |message| {
                        progress.emit(ProgressEvent::WorkflowMessage {
                            workflow: workflow.to_string(),
                            node: None,
                            payload: message.payload.clone(),
                        });
                    })
                    .await
            })
            .await?;
        run.note(format!("{} step(s) reported", messages.len()));
        Ok(())
    }

    /// Runs the per-node workflow on every node of a batch.
    async fn apply_nodes(&self, workflow: &str, batch: &Batch) -> Vec<NodeResult> {
        let mut tasks = BoundedTaskSet::new(self.config.concurrency.max_parallel_nodes);

        for node in &batch.nodes {
            let dispatcher = Arc::clone(&self.workflows);
            let poller = self.poller.clone();
            let progress = self.progress.clone();
            let workflow = workflow.to_string();
            let name = node.name.clone();
            let input = json!({
                "stack": self.config.stack_name(),
                "plan": self.config.plan_name(),
                "node": node.name,
                "role": node.role,
            });

            tasks.spawn(node.name.clone(), async move {
                let outcome = apply_node(&dispatcher, &poller, &progress, &workflow, &name, input).await;
                progress.emit(ProgressEvent::NodeOutcome {
                    node: name,
                    outcome: outcome.clone(),
                });
                outcome
            });
        }

        tasks
            .join_all(|node| NodeOutcome::Failed {
                reason: format!("apply task for {node} did not complete"),
                kind: FailureKind::Internal,
            })
            .await
            .into_iter()
            .map(|(node, outcome)| NodeResult { node, outcome })
            .collect()
    }
}

async fn apply_node(
    dispatcher: &Dispatcher,
    poller: &Poller,
    progress: &ProgressSink,
    workflow: &str,
    node: &str,
    input: Value,
) -> NodeOutcome {
    let result = async {
        let mut handle = dispatcher.run(workflow, input).await?;
        dispatcher
            .wait(&mut handle, poller, |message| {
                progress.emit(ProgressEvent::WorkflowMessage {
                    workflow: workflow.to_string(),
                    node: Some(node.to_string()),
                    payload: message.payload.clone(),
                });
            })
            .await
    }
    .await;

    match result {
        Ok(_) => NodeOutcome::Succeeded,
        Err(OvercloudError::Workflow(WorkflowError::ExecutionFailed { payload, .. })) => {
            NodeOutcome::Failed {
                reason: failure_reason(&payload),
                kind: FailureKind::BackendFailure,
            }
        }
        Err(e) => NodeOutcome::from_error(&e),
    }
}

/// Returns the payload's message, or the whole payload.
fn failure_reason(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| payload.to_string(), str::to_string)
}

fn short_digest(export: &PlanExport) -> &str {
    &export.digest[..export.digest.len().min(12)]
}

/// Checks that every release-skip parameter is declared.
///
/// A `null` expectation only requires a non-empty value.
fn check_release_skip(required: &Parameters, merged: &Parameters) -> Result<()> {
    if required.is_empty() {
        return Err(OrchestrationError::InvalidUpgradePath {
            reason: String::from("no release-skip parameters are configured"),
        }
        .into());
    }

    let problems: Vec<String> = required
        .iter()
        .filter_map(|(key, expected)| match merged.get(key) {
            None => Some(format!("{key} is not set")),
            Some(value) if expected.is_null() => is_empty_value(value).then(|| format!("{key} is empty")),
            Some(value) if value != expected => Some(format!("{key} is {value}, expected {expected}")),
            Some(_) => None,
        })
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidUpgradePath {
            reason: problems.join("; "),
        }
        .into())
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
