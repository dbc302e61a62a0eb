//! Node lifecycle controller.
//!
//! Fans a lifecycle command out to many nodes with bounded parallelism, polls
//! each node to its target state and reports one outcome per node. One node's
//! failure never stops its siblings, and a call returns only once every node
//! has an outcome.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{FailureKind, NodeError, OvercloudError, Result};
use crate::fanout::{BoundedTaskSet, DEFAULT_MAX_PARALLEL};
use crate::poll::Poller;

use super::client::ProvisioningService;
use super::types::{
    BatchReport, Node, NodeCommand, NodeOutcome, NodeRegistration, NodeResult, NodeState,
};

/// Drives node lifecycle transitions.
#[derive(Debug)]
pub struct NodeLifecycleController<P> {
    service: Arc<P>,
    poller: Poller,
    max_parallel: usize,
}

impl<P: ProvisioningService + 'static> NodeLifecycleController<P> {
    /// Creates a controller.
    #[must_use]
    pub const fn new(service: Arc<P>, poller: Poller) -> Self {
        Self {
            service,
            poller,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Sets how many nodes are driven at once.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Returns the provisioning service.
    #[must_use]
    pub fn service(&self) -> &P {
        &self.service
    }

    /// Registers nodes and takes them under management.
    ///
    /// Nodes whose name is already registered are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing nodes cannot be listed.
    pub async fn import(&self, registrations: Vec<NodeRegistration>) -> Result<BatchReport> {
        let existing: HashSet<String> = self
            .service
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| n.name)
            .collect();

        let mut tasks = BoundedTaskSet::new(self.max_parallel);
        for registration in registrations {
            let service = Arc::clone(&self.service);
            let poller = self.poller.clone();
            let registered = existing.contains(&registration.name);

            tasks.spawn(registration.name.clone(), async move {
                if registered {
                    return NodeOutcome::Skipped {
                        reason: String::from("already registered"),
                    };
                }
                register(service.as_ref(), &poller, &registration)
                    .await
                    .unwrap_or_else(|e| NodeOutcome::from_error(&e))
            });
        }

        Ok(Self::report(NodeCommand::Import, tasks).await)
    }

    /// Runs hardware introspection on the given nodes.
    pub async fn introspect(&self, ids: &[String]) -> BatchReport {
        self.fan_out(NodeCommand::Introspect, ids).await
    }

    /// Makes the given nodes available for deployment.
    pub async fn provide(&self, ids: &[String]) -> BatchReport {
        self.fan_out(NodeCommand::Provide, ids).await
    }

    /// Cleans the given nodes.
    pub async fn clean(&self, ids: &[String]) -> BatchReport {
        self.fan_out(NodeCommand::Clean, ids).await
    }

    /// Returns the nodes tagged with one of `roles`, grouped in role order.
    ///
    /// # Errors
    ///
    /// Returns an error if the nodes cannot be listed.
    pub async fn nodes_for_roles(&self, roles: &[String]) -> Result<Vec<Node>> {
        let mut nodes: Vec<(usize, Node)> = self
            .service
            .list_nodes()
            .await?
            .into_iter()
            .filter_map(|node| {
                let position = roles
                    .iter()
                    .position(|r| node.role.as_deref() == Some(r.as_str()))?;
                Some((position, node))
            })
            .collect();

        nodes.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| a.name.cmp(&b.name)));
        Ok(nodes.into_iter().map(|(_, node)| node).collect())
    }

    /// Returns node names by role. Nodes without a role are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the nodes cannot be listed.
    pub async fn node_roles(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut roles: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in self.service.list_nodes().await? {
            if let Some(role) = node.role {
                roles.entry(role).or_default().push(node.name);
            }
        }
        for names in roles.values_mut() {
            names.sort();
        }
        Ok(roles)
    }

    async fn fan_out(&self, command: NodeCommand, ids: &[String]) -> BatchReport {
        let mut tasks = BoundedTaskSet::new(self.max_parallel);
        for id in ids {
            let service = Arc::clone(&self.service);
            let poller = self.poller.clone();
            let node = id.clone();

            tasks.spawn(id.clone(), async move {
                transition(service.as_ref(), &poller, &node, command)
                    .await
                    .unwrap_or_else(|e| NodeOutcome::from_error(&e))
            });
        }

        Self::report(command, tasks).await
    }

    async fn report(
        command: NodeCommand,
        tasks: BoundedTaskSet<String, NodeOutcome>,
    ) -> BatchReport {
        let results: Vec<NodeResult> = tasks
            .join_all(|node| NodeOutcome::Failed {
                reason: format!("{command} task for {node} did not complete"),
                kind: FailureKind::Internal,
            })
            .await
            .into_iter()
            .map(|(node, outcome)| NodeResult { node, outcome })
            .collect();

        for result in &results {
            match &result.outcome {
                NodeOutcome::Failed { reason, .. } => {
                    warn!("Node {} {command} failed: {reason}", result.node);
                }
                NodeOutcome::Skipped { reason } => {
                    info!("Node {} {command} skipped: {reason}", result.node);
                }
                NodeOutcome::Succeeded => info!("Node {} {command} done", result.node),
            }
        }

        BatchReport { command, results }
    }
}

/// Issues `command` for one node and waits for its target state.
async fn transition<P: ProvisioningService + ?Sized>(
    service: &P,
    poller: &Poller,
    id: &str,
    command: NodeCommand,
) -> Result<NodeOutcome> {
    let node = service.get_node(id).await?.ok_or_else(|| NodeError::NotFound {
        node: id.to_string(),
    })?;

    if command.skips(&node.state) {
        return Ok(NodeOutcome::Skipped {
            reason: format!("already {}", node.state),
        });
    }
    if !command.accepts(&node.state) {
        return Err(NodeError::InvalidTransition {
            node: id.to_string(),
            command: command.to_string(),
            state: node.state.to_string(),
        }
        .into());
    }

    service.set_provision_state(&node.id, command.verb()).await?;
    await_target(service, poller, &node, command).await?;
    Ok(NodeOutcome::Succeeded)
}

async fn register<P: ProvisioningService + ?Sized>(
    service: &P,
    poller: &Poller,
    registration: &NodeRegistration,
) -> Result<NodeOutcome> {
    let node = service.register_node(registration).await?;
    service
        .set_provision_state(&node.id, NodeCommand::Import.verb())
        .await?;
    await_target(service, poller, &node, NodeCommand::Import).await?;
    Ok(NodeOutcome::Succeeded)
}

/// Polls a node until it reaches the command's target or `error`.
///
/// States are only trusted once the node moved away from what it reported
/// before the request: a different state, a newer `provision_updated_at`, or a
/// new error message. Until then a node already sitting in the target state,
/// or in `error` from an earlier attempt, has not acted on the request yet.
async fn await_target<P: ProvisioningService + ?Sized>(
    service: &P,
    poller: &Poller,
    initial: &Node,
    command: NodeCommand,
) -> Result<()> {
    let target = command.target();
    let window = poller.start(format!("node {} {command}", initial.name));
    let mut moved = false;

    loop {
        let node = window
            .observe(async {
                let found = service.get_node(&initial.id).await?;
                found.ok_or_else(|| {
                    OvercloudError::from(NodeError::NotFound {
                        node: initial.id.clone(),
                    })
                })
            })
            .await?;

        moved = moved || has_moved(initial, &node);
        if moved {
            if node.state == target {
                return Ok(());
            }
            if node.state == NodeState::Error {
                return Err(NodeError::TransitionFailed {
                    node: node.name,
                    state: node.state.to_string(),
                    reason: node
                        .last_error
                        .unwrap_or_else(|| String::from("unknown provisioning error")),
                }
                .into());
            }
        }
        window.wait_next().await?;
    }
}

fn has_moved(initial: &Node, node: &Node) -> bool {
    if node.state != initial.state {
        return true;
    }
    if let (Some(now), Some(before)) = (node.provision_updated_at, initial.provision_updated_at)
        && now > before
    {
        return true;
    }
    node.state == NodeState::Error && node.last_error != initial.last_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollSettings;
    use crate::testing::FakeProvisioning;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn controller(fake: &FakeProvisioning) -> NodeLifecycleController<FakeProvisioning> {
        let poller = Poller::new(
            PollSettings::new(Duration::from_millis(2), Duration::from_millis(500)),
            CancellationToken::new(),
        );
        NodeLifecycleController::new(Arc::new(fake.clone()), poller).with_max_parallel(2)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let fake = FakeProvisioning::new();
        for id in ["n1", "n2", "n3", "n4"] {
            fake.add_node(id, Some("Compute"), NodeState::Manageable);
        }
        fake.fail_on("n2", "cleaning step failed");

        let report = controller(&fake).clean(&ids(&["n1", "n2", "n3", "n4"])).await;

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.succeeded(), 3);
        let failed: Vec<_> = report.failures().map(|r| r.node.as_str()).collect();
        assert_eq!(failed, ["n2"]);
        assert_eq!(
            report.results[1].outcome,
            NodeOutcome::Failed {
                reason: String::from("cleaning step failed"),
                kind: FailureKind::BackendFailure,
            }
        );
        assert_eq!(fake.state("n4"), Some(NodeState::Available));
    }

    #[tokio::test]
    async fn test_invalid_source_state_skips_backend() {
        let fake = FakeProvisioning::new();
        fake.add_node("n1", None, NodeState::Managed);
        fake.add_node("n2", None, NodeState::Active);

        let report = controller(&fake).provide(&ids(&["n1", "n2"])).await;

        assert!(matches!(
            report.results[0].outcome,
            NodeOutcome::Failed {
                kind: FailureKind::Validation,
                ..
            }
        ));
        assert!(matches!(report.results[1].outcome, NodeOutcome::Skipped { .. }));
        assert!(fake.provision_calls().is_empty());
    }

    #[tokio::test]
    async fn test_error_state_is_recoverable() {
        let fake = FakeProvisioning::new();
        fake.add_node("n1", None, NodeState::Error);

        let report = controller(&fake).introspect(&ids(&["n1"])).await;

        assert!(report.is_success());
        assert_eq!(fake.state("n1"), Some(NodeState::Manageable));
        assert_eq!(fake.provision_calls(), [(String::from("n1"), String::from("inspect"))]);
    }

    #[tokio::test]
    async fn test_target_state_before_pickup_is_not_success() {
        let fake = FakeProvisioning::new();
        fake.add_node("n1", None, NodeState::Manageable);
        fake.lag("n1");
        fake.fail_on("n1", "inspection failed");

        let report = controller(&fake).introspect(&ids(&["n1"])).await;

        assert_eq!(
            report.results[0].outcome,
            NodeOutcome::Failed {
                reason: String::from("inspection failed"),
                kind: FailureKind::BackendFailure,
            }
        );
    }

    #[tokio::test]
    async fn test_slow_introspection_of_manageable_node() {
        let fake = FakeProvisioning::new();
        fake.add_node("n1", None, NodeState::Manageable);
        fake.lag("n1");

        let report = controller(&fake).introspect(&ids(&["n1"])).await;

        assert!(report.is_success());
        assert_eq!(fake.state("n1"), Some(NodeState::Manageable));
    }

    #[tokio::test]
    async fn test_repeated_error_is_reported_not_timed_out() {
        let fake = FakeProvisioning::new();
        fake.add_failed_node("n1", "ipmi timeout");
        fake.fail_on("n1", "ipmi timeout");

        let report = controller(&fake).provide(&ids(&["n1"])).await;

        assert_eq!(
            report.results[0].outcome,
            NodeOutcome::Failed {
                reason: String::from("ipmi timeout"),
                kind: FailureKind::BackendFailure,
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_node_fails_alone() {
        let fake = FakeProvisioning::new();
        fake.add_node("n1", None, NodeState::Manageable);

        let report = controller(&fake).provide(&ids(&["ghost", "n1"])).await;

        assert!(report.results[0].outcome.is_failed());
        assert_eq!(report.results[1].outcome, NodeOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_import_skips_registered_names() {
        let fake = FakeProvisioning::new();
        fake.add_node("n1", Some("Controller"), NodeState::Manageable);

        let registrations = vec![
            NodeRegistration {
                name: String::from("n1"),
                role: None,
                properties: serde_json::Map::new(),
            },
            NodeRegistration {
                name: String::from("n9"),
                role: Some(String::from("Compute")),
                properties: serde_json::Map::new(),
            },
        ];
        let report = controller(&fake).import(registrations).await.unwrap();

        assert!(matches!(report.results[0].outcome, NodeOutcome::Skipped { .. }));
        assert_eq!(report.results[1].outcome, NodeOutcome::Succeeded);
        assert_eq!(fake.state("n9"), Some(NodeState::Managed));
    }

    #[tokio::test]
    async fn test_role_queries() {
        let fake = FakeProvisioning::new();
        fake.add_node("cmp-1", Some("Compute"), NodeState::Active);
        fake.add_node("ctrl-0", Some("Controller"), NodeState::Active);
        fake.add_node("cmp-0", Some("Compute"), NodeState::Active);
        fake.add_node("spare", None, NodeState::Available);
        let controller = controller(&fake);

        let nodes = controller
            .nodes_for_roles(&ids(&["Controller", "Compute"]))
            .await
            .unwrap();
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["ctrl-0", "cmp-0", "cmp-1"]);

        let roles = controller.node_roles().await.unwrap();
        assert_eq!(roles["Compute"], ["cmp-0", "cmp-1"]);
        assert!(!roles.values().flatten().any(|n| n == "spare"));
    }
}
