//! Provisioning service interface and its HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::ApiClient;
use crate::error::Result;

use super::types::{Node, NodeRegistration};

/// Service name used in errors and logs.
pub const SERVICE: &str = "provisioning";

/// Raw operations of the bare-metal provisioning service.
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    /// Lists every registered node.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Gets a node by identifier or name. Returns `None` if it does not exist.
    async fn get_node(&self, id: &str) -> Result<Option<Node>>;

    /// Registers a node.
    async fn register_node(&self, registration: &NodeRegistration) -> Result<Node>;

    /// Requests a provision-state transition.
    async fn set_provision_state(&self, id: &str, verb: &str) -> Result<()>;
}

#[async_trait]
impl ProvisioningService for Box<dyn ProvisioningService> {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        (**self).list_nodes().await
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        (**self).get_node(id).await
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<Node> {
        (**self).register_node(registration).await
    }

    async fn set_provision_state(&self, id: &str, verb: &str) -> Result<()> {
        (**self).set_provision_state(id, verb).await
    }
}

/// HTTP client for the provisioning service.
#[derive(Debug, Clone)]
pub struct ProvisioningClient {
    api: ApiClient,
}

impl ProvisioningClient {
    /// Creates a client over an API transport.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Serialize)]
struct ProvisionStateRequest<'a> {
    target: &'a str,
}

#[async_trait]
impl ProvisioningService for ProvisioningClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        #[derive(Deserialize)]
        struct Response {
            nodes: Vec<Node>,
        }

        let response: Response = self.api.get("nodes").await?;
        Ok(response.nodes)
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.api.get_optional(&format!("nodes/{id}")).await?)
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<Node> {
        debug!("Registering node {}", registration.name);
        Ok(self.api.post("nodes", registration).await?)
    }

    async fn set_provision_state(&self, id: &str, verb: &str) -> Result<()> {
        debug!("Node {id}: provision state -> {verb}");
        let _: serde_json::Value = self
            .api
            .put(
                &format!("nodes/{id}/states/provision"),
                &ProvisionStateRequest { target: verb },
            )
            .await?;
        Ok(())
    }
}
