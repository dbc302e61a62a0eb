//! In-memory service doubles shared by unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::error::{ApiError, NodeError, PlanStoreError, Result};
use crate::nodes::{Node, NodeRegistration, NodeState, ProvisioningService};
use crate::plan::{BackendResult, PlanBackend, PlanDocument};
use crate::stack::{
    OrchestrationService, StackEvent, StackRecord, StackResource, StackStatus, StackSubmission,
};
use crate::workflow::{Execution, ExecutionStatus, WorkflowMessage, WorkflowService};

/// Fixed reference time so resource ordering is deterministic.
fn at(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap_or_default()
}

// ============================================================================
// Plan backend
// ============================================================================

/// Memory-backed plan store that fails its first `failures` calls.
#[derive(Debug, Clone)]
pub struct FlakyPlanBackend {
    failures: Arc<Mutex<u32>>,
    transient: bool,
    plans: Arc<Mutex<BTreeMap<String, PlanDocument>>>,
}

impl FlakyPlanBackend {
    pub fn new(failures: u32, transient: bool) -> Self {
        Self {
            failures: Arc::new(Mutex::new(failures)),
            transient,
            plans: Arc::default(),
        }
    }

    fn trip(&self) -> BackendResult<()> {
        let mut left = self.failures.lock().unwrap();
        if *left == 0 {
            return Ok(());
        }
        *left -= 1;
        Err(PlanStoreError::Backend {
            backend: "flaky",
            message: String::from("store unavailable"),
            transient: self.transient,
        })
    }
}

#[async_trait]
impl PlanBackend for FlakyPlanBackend {
    async fn load(&self, name: &str) -> BackendResult<Option<PlanDocument>> {
        self.trip()?;
        Ok(self.plans.lock().unwrap().get(name).cloned())
    }

    async fn save(&self, plan: &PlanDocument) -> BackendResult<()> {
        self.trip()?;
        self.plans
            .lock()
            .unwrap()
            .insert(plan.name.clone(), plan.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> BackendResult<bool> {
        self.trip()?;
        Ok(self.plans.lock().unwrap().remove(name).is_some())
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        self.trip()?;
        Ok(self.plans.lock().unwrap().contains_key(name))
    }

    async fn list(&self) -> BackendResult<Vec<String>> {
        self.trip()?;
        Ok(self.plans.lock().unwrap().keys().cloned().collect())
    }

    fn backend_type(&self) -> &'static str {
        "flaky"
    }
}

// ============================================================================
// Orchestration
// ============================================================================

#[derive(Debug, Default)]
struct FakeStack {
    status: Option<StackStatus>,
    queue: VecDeque<StackStatus>,
    resources: Vec<StackResource>,
    updated: i64,
}

impl FakeStack {
    /// Moves to `next`, stamping the update time when an action starts.
    fn advance(&mut self, next: Option<StackStatus>, clock: &mut i64) {
        if next != self.status && next.as_ref().is_some_and(StackStatus::is_in_progress) {
            *clock += 1;
            self.updated = *clock;
        }
        self.status = next;
    }
}

#[derive(Debug, Default)]
struct OrchestrationState {
    stacks: HashMap<String, FakeStack>,
    armed: HashMap<String, Vec<StackStatus>>,
    submissions: Vec<StackSubmission>,
    deleted: Vec<String>,
    clock: i64,
}

/// Orchestration service double.
///
/// Without a script, create and update complete at once and delete removes
/// the stack. A script is armed by the next mutation of that stack; each
/// `get_stack` then reports the next scripted status and the last one sticks.
/// A script may start with the stack's current status to model a service
/// that has not picked the mutation up yet. `updated_time` moves whenever an
/// action starts.
#[derive(Debug, Clone, Default)]
pub struct FakeOrchestration {
    state: Arc<Mutex<OrchestrationState>>,
}

impl FakeOrchestration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, stack: &str, status: StackStatus) {
        let mut state = self.state.lock().unwrap();
        let entry = state.stacks.entry(stack.to_string()).or_default();
        entry.status = Some(status);
        entry.queue.clear();
    }

    pub fn script(&self, stack: &str, statuses: Vec<StackStatus>) {
        self.state
            .lock()
            .unwrap()
            .armed
            .insert(stack.to_string(), statuses);
    }

    pub fn add_failed_resource(&self, stack: &str, name: &str, reason: &str, offset_secs: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .stacks
            .entry(stack.to_string())
            .or_default()
            .resources
            .push(StackResource {
                resource_name: name.to_string(),
                resource_type: Some(String::from("OS::Heat::StructuredDeployment")),
                resource_status: StackStatus::CreateFailed,
                resource_status_reason: Some(reason.to_string()),
                updated_time: Some(at(offset_secs)),
            });
    }

    pub fn submissions(&self) -> Vec<StackSubmission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Current status, without advancing a script.
    pub fn status(&self, stack: &str) -> Option<StackStatus> {
        self.state
            .lock()
            .unwrap()
            .stacks
            .get(stack)
            .and_then(|s| s.status.clone())
    }

    fn mutate(&self, stack: &str, settled: Option<StackStatus>) {
        let mut state = self.state.lock().unwrap();
        let script = state.armed.remove(stack);
        let OrchestrationState { stacks, clock, .. } = &mut *state;
        let entry = stacks.entry(stack.to_string()).or_default();
        match script {
            Some(statuses) => {
                entry.advance(statuses.first().cloned(), clock);
                entry.queue = statuses.into();
            }
            None => {
                *clock += 1;
                entry.updated = *clock;
                entry.status = settled;
                entry.queue.clear();
            }
        }
    }
}

#[async_trait]
impl OrchestrationService for FakeOrchestration {
    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>> {
        let mut state = self.state.lock().unwrap();
        let OrchestrationState { stacks, clock, .. } = &mut *state;
        let Some(stack) = stacks.get_mut(name) else {
            return Ok(None);
        };

        if stack.queue.len() > 1 {
            let next = stack.queue.pop_front();
            stack.advance(next, clock);
        } else if let Some(last) = stack.queue.front().cloned() {
            stack.advance(Some(last), clock);
        }

        Ok(stack.status.clone().map(|status| StackRecord {
            name: name.to_string(),
            id: Some(format!("{name}-id")),
            status_reason: status
                .is_failed()
                .then(|| String::from("Resource CREATE failed: deployment error")),
            status,
            updated_time: Some(at(stack.updated)),
        }))
    }

    async fn create_stack(&self, submission: &StackSubmission) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .submissions
            .push(submission.clone());
        self.mutate(&submission.stack_name, Some(StackStatus::CreateComplete));
        Ok(())
    }

    async fn update_stack(&self, submission: &StackSubmission) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .submissions
            .push(submission.clone());
        self.mutate(&submission.stack_name, Some(StackStatus::UpdateComplete));
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> Result<bool> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.deleted.push(name.to_string());
            if state.stacks.get(name).and_then(|s| s.status.as_ref()).is_none() {
                return Ok(false);
            }
            state.armed.contains_key(name)
        };

        if scripted {
            self.mutate(name, None);
        } else {
            self.state.lock().unwrap().stacks.remove(name);
        }
        Ok(true)
    }

    async fn list_resources(&self, name: &str) -> Result<Vec<StackResource>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .stacks
            .get(name)
            .map(|s| s.resources.clone())
            .unwrap_or_default())
    }

    async fn list_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        Ok(self
            .list_resources(name)
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, r)| StackEvent {
                id: Some(format!("event-{i}")),
                resource_name: r.resource_name,
                resource_status: r.resource_status,
                resource_status_reason: r.resource_status_reason,
                event_time: r.updated_time.unwrap_or_else(|| at(0)),
            })
            .collect())
    }
}

// ============================================================================
// Provisioning
// ============================================================================

#[derive(Debug)]
struct FakeNode {
    node: Node,
    pending: VecDeque<NodeState>,
    failure: Option<String>,
}

impl FakeNode {
    fn new(node: Node) -> Self {
        Self {
            node,
            pending: VecDeque::new(),
            failure: None,
        }
    }

    /// Moves to `state`, stamping the change like the real service does.
    fn enter(&mut self, state: NodeState, clock: &mut i64) {
        *clock += 1;
        if state == NodeState::Error {
            self.node.last_error = self.failure.take();
        }
        self.node.state = state;
        self.node.provision_updated_at = Some(at(*clock));
    }
}

#[derive(Debug, Default)]
struct ProvisioningState {
    nodes: BTreeMap<String, FakeNode>,
    failing: HashMap<String, String>,
    lagging: HashSet<String>,
    calls: Vec<(String, String)>,
    clock: i64,
}

/// Provisioning service double.
///
/// After a provision request a node reports its in-flight state once, then
/// the verb's target state, or `error` for nodes set up with `fail_on`.
/// Nodes set up with `lag` keep reporting their old state for one more read.
#[derive(Debug, Clone, Default)]
pub struct FakeProvisioning {
    state: Arc<Mutex<ProvisioningState>>,
}

impl FakeProvisioning {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node whose name is its id.
    pub fn add_node(&self, id: &str, role: Option<&str>, state: NodeState) {
        self.state.lock().unwrap().nodes.insert(
            id.to_string(),
            FakeNode::new(Node {
                id: id.to_string(),
                name: id.to_string(),
                role: role.map(str::to_string),
                state,
                last_error: None,
                provision_updated_at: Some(at(0)),
                properties: serde_json::Map::new(),
            }),
        );
    }

    /// Adds a node left in `error` by an earlier attempt.
    pub fn add_failed_node(&self, id: &str, last_error: &str) {
        self.add_node(id, None, NodeState::Error);
        if let Some(entry) = self.state.lock().unwrap().nodes.get_mut(id) {
            entry.node.last_error = Some(last_error.to_string());
        }
    }

    pub fn fail_on(&self, id: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(id.to_string(), reason.to_string());
    }

    /// Delays the node's reaction to provision requests by one read.
    pub fn lag(&self, id: &str) {
        self.state.lock().unwrap().lagging.insert(id.to_string());
    }

    pub fn state(&self, id: &str) -> Option<NodeState> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(id)
            .map(|n| n.pending.back().cloned().unwrap_or_else(|| n.node.state.clone()))
    }

    pub fn provision_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ProvisioningService for FakeProvisioning {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nodes
            .values()
            .map(|n| n.node.clone())
            .collect())
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let mut state = self.state.lock().unwrap();
        let ProvisioningState { nodes, clock, .. } = &mut *state;
        let Some(entry) = nodes
            .values_mut()
            .find(|n| n.node.id == id || n.node.name == id)
        else {
            return Ok(None);
        };

        let snapshot = entry.node.clone();
        if let Some(next) = entry.pending.pop_front() {
            entry.enter(next, clock);
        }
        Ok(Some(snapshot))
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<Node> {
        let node = Node {
            id: registration.name.clone(),
            name: registration.name.clone(),
            role: registration.role.clone(),
            state: NodeState::Unknown(String::from("enroll")),
            last_error: None,
            provision_updated_at: Some(at(0)),
            properties: registration.properties.clone(),
        };
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(node.id.clone(), FakeNode::new(node.clone()));
        Ok(node)
    }

    async fn set_provision_state(&self, id: &str, verb: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((id.to_string(), verb.to_string()));
        let failure = state.failing.get(id).cloned();
        let lagging = state.lagging.contains(id);
        let ProvisioningState { nodes, clock, .. } = &mut *state;
        let entry = nodes.get_mut(id).ok_or_else(|| NodeError::NotFound {
            node: id.to_string(),
        })?;

        let (in_flight, target) = match verb {
            "manage" => (None, NodeState::Managed),
            "inspect" => (Some(NodeState::Inspecting), NodeState::Manageable),
            "provide" => (None, NodeState::Available),
            "clean" => (Some(NodeState::Cleaning), NodeState::Available),
            other => {
                return Err(ApiError::Rejected {
                    service: "provisioning",
                    status: 400,
                    message: format!("unknown target {other}"),
                }
                .into());
            }
        };

        entry.pending.clear();
        if let Some(in_flight) = in_flight {
            if lagging {
                entry.pending.push_back(in_flight);
            } else {
                entry.enter(in_flight, clock);
            }
        }
        entry.failure = failure;
        entry.pending.push_back(if entry.failure.is_some() {
            NodeState::Error
        } else {
            target
        });
        Ok(())
    }
}

// ============================================================================
// Workflow
// ============================================================================

#[derive(Debug, Clone)]
enum Ending {
    Success,
    Fail(String),
    Silent(Value),
}

#[derive(Debug)]
struct FakeExecution {
    workflow: String,
    input: Value,
    ending: Ending,
    polls: u32,
    late: Vec<Value>,
}

impl FakeExecution {
    fn status(&self) -> ExecutionStatus {
        match (self.polls, &self.ending) {
            (0 | 1, _) => ExecutionStatus::Running,
            (_, Ending::Success) => ExecutionStatus::Success,
            (_, Ending::Fail(_) | Ending::Silent(_)) => ExecutionStatus::Error,
        }
    }

    fn output(&self) -> Value {
        match (&self.ending, self.status().is_terminal()) {
            (Ending::Silent(output), true) => output.clone(),
            (Ending::Fail(reason), true) => json!({"message": reason}),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Default)]
struct WorkflowState {
    executions: Vec<FakeExecution>,
    failing: Vec<(String, Ending)>,
}

/// Workflow service double.
///
/// Executions report `RUNNING` once, then finish. Message listing ignores the
/// cursor so callers see every message again on each poll.
#[derive(Debug, Clone, Default)]
pub struct FakeWorkflow {
    state: Arc<Mutex<WorkflowState>>,
}

impl FakeWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails executions whose workflow or `node` input is `key`.
    pub fn fail_when(&self, key: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .push((key.to_string(), Ending::Fail(reason.to_string())));
    }

    /// Fails matching executions without emitting an error message.
    pub fn fail_silently_when(&self, key: &str, output: Value) {
        self.state
            .lock()
            .unwrap()
            .failing
            .push((key.to_string(), Ending::Silent(output)));
    }

    /// Appends a message that the service only lists from now on.
    pub fn flush_late(&self, id: &str, payload: Value) {
        if let Ok(index) = self.execution(id) {
            self.state.lock().unwrap().executions[index].late.push(payload);
        }
    }

    /// Started executions as `(workflow, input)`.
    pub fn executions(&self) -> Vec<(String, Value)> {
        self.state
            .lock()
            .unwrap()
            .executions
            .iter()
            .map(|e| (e.workflow.clone(), e.input.clone()))
            .collect()
    }

    fn execution(&self, id: &str) -> Result<usize> {
        id.strip_prefix("exec-")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n < self.state.lock().unwrap().executions.len())
            .ok_or_else(|| {
                ApiError::NotFound {
                    service: "workflow",
                    resource: format!("executions/{id}"),
                }
                .into()
            })
    }

    fn snapshot(id: &str, execution: &FakeExecution) -> Execution {
        Execution {
            id: id.to_string(),
            workflow: execution.workflow.clone(),
            input: execution.input.clone(),
            status: execution.status(),
            output: execution.output(),
        }
    }
}

#[async_trait]
impl WorkflowService for FakeWorkflow {
    async fn start_execution(&self, workflow: &str, input: &Value) -> Result<Execution> {
        let mut state = self.state.lock().unwrap();
        let node = input.get("node").and_then(Value::as_str);
        let ending = state
            .failing
            .iter()
            .find(|(key, _)| key == workflow || Some(key.as_str()) == node)
            .map_or(Ending::Success, |(_, ending)| ending.clone());

        let execution = FakeExecution {
            workflow: workflow.to_string(),
            input: input.clone(),
            ending,
            polls: 0,
            late: Vec::new(),
        };
        let id = format!("exec-{}", state.executions.len());
        let snapshot = Self::snapshot(&id, &execution);
        state.executions.push(execution);
        Ok(snapshot)
    }

    async fn get_execution(&self, id: &str) -> Result<Execution> {
        let index = self.execution(id)?;
        let mut state = self.state.lock().unwrap();
        let execution = &mut state.executions[index];
        execution.polls += 1;
        Ok(Self::snapshot(id, execution))
    }

    async fn list_messages(&self, id: &str, _after: u64) -> Result<Vec<WorkflowMessage>> {
        let index = self.execution(id)?;
        let state = self.state.lock().unwrap();
        let execution = &state.executions[index];

        let mut messages = Vec::new();
        if execution.polls == 0 {
            return Ok(messages);
        }
        messages.push(WorkflowMessage {
            seq: 1,
            payload: json!({"status": "RUNNING", "message": "started"}),
        });

        if execution.status().is_terminal() {
            let last = match &execution.ending {
                Ending::Success => Some(json!({"status": "SUCCESS", "message": "completed"})),
                Ending::Fail(reason) => Some(json!({"status": "FAILED", "message": reason})),
                Ending::Silent(_) => None,
            };
            messages.extend(last.map(|payload| WorkflowMessage { seq: 2, payload }));
        }
        let next = messages.len() as u64 + 1;
        messages.extend(execution.late.iter().zip(next..).map(|(payload, seq)| {
            WorkflowMessage {
                seq,
                payload: payload.clone(),
            }
        }));
        Ok(messages)
    }
}
