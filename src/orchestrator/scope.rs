//! Run scopes and batch planning for rolling updates and upgrades.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use crate::config::DeployConfig;
use crate::error::{OrchestrationError, Result};
use crate::plan::Parameters;

/// Parameter carrying the roles a batch submission targets.
pub const BATCH_ROLES_PARAM: &str = "UpdateBatchRoles";

/// Parameter carrying the nodes a batch submission targets.
pub const BATCH_NODES_PARAM: &str = "UpdateBatchNodes";

/// Parameter telling the stack whether this submission converges the whole
/// overcloud.
pub const CONVERGE_PARAM: &str = "UpdateConverge";

/// Which part of the overcloud a run touches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "scope", content = "targets", rename_all = "snake_case")]
pub enum RunScope {
    /// Every role, one batch per role.
    #[default]
    All,
    /// The named roles, one batch per role.
    Roles(Vec<String>),
    /// The named nodes, as a single batch.
    Nodes(Vec<String>),
}

/// A node targeted by a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchNode {
    /// Node name.
    pub name: String,
    /// Node role.
    pub role: String,
}

/// One independent stack submission plus per-node apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Label used in phase records.
    pub label: String,
    /// Roles the batch touches.
    pub roles: Vec<String>,
    /// Nodes the batch applies to.
    pub nodes: Vec<BatchNode>,
}

impl Batch {
    /// Returns the extra parameters scoping the stack submission to this batch.
    #[must_use]
    pub fn parameters(&self) -> Parameters {
        let nodes: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        let mut parameters = Parameters::new();
        parameters.insert(BATCH_ROLES_PARAM.to_string(), json!(self.roles));
        parameters.insert(BATCH_NODES_PARAM.to_string(), json!(nodes));
        parameters.insert(CONVERGE_PARAM.to_string(), json!(false));
        parameters
    }
}

/// Splits a scope into ordered batches.
///
/// With `control_plane_first`, control plane batches run first and the rest
/// follow in configuration order, whatever order the roles were requested in.
/// Otherwise the requested order is kept.
///
/// # Errors
///
/// Returns [`OrchestrationError::InvalidScope`] for unknown nodes, roles
/// without nodes, a node scope that covers only part of a control plane role,
/// or a scope that selects nothing.
pub fn plan_batches(
    config: &DeployConfig,
    node_roles: &BTreeMap<String, Vec<String>>,
    scope: &RunScope,
    control_plane_first: bool,
) -> Result<Vec<Batch>> {
    let mut batches = match scope {
        RunScope::All => known_roles(config, node_roles)
            .into_iter()
            .filter_map(|role| role_batch(node_roles, &role))
            .collect(),
        RunScope::Roles(roles) => {
            let mut batches: Vec<Batch> = Vec::with_capacity(roles.len());
            for role in roles {
                if batches.iter().any(|b| &b.label == role) {
                    continue;
                }
                let batch = role_batch(node_roles, role).ok_or_else(|| {
                    invalid_scope(format!("role {role} has no registered nodes"))
                })?;
                batches.push(batch);
            }
            batches
        }
        RunScope::Nodes(names) => vec![node_batch(config, node_roles, names)?],
    };

    if batches.is_empty() {
        return Err(invalid_scope("the scope selects no nodes"));
    }

    if control_plane_first {
        let order = known_roles(config, node_roles);
        batches.sort_by_key(|b| {
            let control_plane = b.roles.iter().any(|r| config.role_kind(r).is_control_plane());
            let position = b
                .roles
                .iter()
                .filter_map(|r| order.iter().position(|o| o == r))
                .min()
                .unwrap_or(order.len());
            (!control_plane, position)
        });
    }
    Ok(batches)
}

/// Returns a single batch covering every node of every role.
///
/// # Errors
///
/// Returns [`OrchestrationError::InvalidScope`] if no node has a role.
pub fn whole_overcloud(
    config: &DeployConfig,
    node_roles: &BTreeMap<String, Vec<String>>,
) -> Result<Batch> {
    let mut batch = Batch {
        label: config.stack_name().to_string(),
        roles: Vec::new(),
        nodes: Vec::new(),
    };
    for role in known_roles(config, node_roles) {
        if let Some(role_batch) = role_batch(node_roles, &role) {
            batch.roles.push(role);
            batch.nodes.extend(role_batch.nodes);
        }
    }

    if batch.nodes.is_empty() {
        return Err(invalid_scope("the overcloud has no nodes with a role"));
    }
    Ok(batch)
}

/// Configured roles in order, then roles only known from the nodes.
fn known_roles(config: &DeployConfig, node_roles: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut roles: Vec<String> = config.roles.iter().map(|r| r.name.clone()).collect();
    for role in node_roles.keys() {
        if !roles.contains(role) {
            roles.push(role.clone());
        }
    }
    roles
}

fn role_batch(node_roles: &BTreeMap<String, Vec<String>>, role: &str) -> Option<Batch> {
    let names = node_roles.get(role).filter(|n| !n.is_empty())?;
    Some(Batch {
        label: role.to_string(),
        roles: vec![role.to_string()],
        nodes: names
            .iter()
            .map(|name| BatchNode {
                name: name.clone(),
                role: role.to_string(),
            })
            .collect(),
    })
}

fn node_batch(
    config: &DeployConfig,
    node_roles: &BTreeMap<String, Vec<String>>,
    names: &[String],
) -> Result<Batch> {
    let mut batch = Batch {
        label: names.join(","),
        roles: Vec::new(),
        nodes: Vec::new(),
    };

    for name in names {
        if batch.nodes.iter().any(|n| &n.name == name) {
            continue;
        }
        let role = node_roles
            .iter()
            .find(|(_, nodes)| nodes.contains(name))
            .map(|(role, _)| role.clone())
            .ok_or_else(|| invalid_scope(format!("node {name} is not assigned to any role")))?;

        if !batch.roles.contains(&role) {
            batch.roles.push(role.clone());
        }
        batch.nodes.push(BatchNode {
            name: name.clone(),
            role,
        });
    }

    for role in &batch.roles {
        if !config.role_kind(role).is_control_plane() {
            continue;
        }
        let missing: Vec<&str> = node_roles
            .get(role)
            .into_iter()
            .flatten()
            .filter(|n| !batch.nodes.iter().any(|b| &b.name == *n))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(invalid_scope(format!(
                "control plane role {role} must run on all its nodes at once (missing {})",
                missing.join(", ")
            )));
        }
    }

    Ok(batch)
}

fn invalid_scope(reason: impl Into<String>) -> crate::error::OvercloudError {
    OrchestrationError::InvalidScope {
        reason: reason.into(),
    }
    .into()
}
