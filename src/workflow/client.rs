//! Workflow service interface and its HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::ApiClient;
use crate::error::Result;

use super::types::{Execution, WorkflowMessage};

/// Service name used in errors and logs.
pub const SERVICE: &str = "workflow";

/// Raw operations of the workflow service.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Starts an execution of `workflow`.
    async fn start_execution(&self, workflow: &str, input: &Value) -> Result<Execution>;

    /// Gets an execution.
    async fn get_execution(&self, id: &str) -> Result<Execution>;

    /// Lists the execution's messages with a sequence number above `after`.
    async fn list_messages(&self, id: &str, after: u64) -> Result<Vec<WorkflowMessage>>;
}

#[async_trait]
impl WorkflowService for Box<dyn WorkflowService> {
    async fn start_execution(&self, workflow: &str, input: &Value) -> Result<Execution> {
        (**self).start_execution(workflow, input).await
    }

    async fn get_execution(&self, id: &str) -> Result<Execution> {
        (**self).get_execution(id).await
    }

    async fn list_messages(&self, id: &str, after: u64) -> Result<Vec<WorkflowMessage>> {
        (**self).list_messages(id, after).await
    }
}

/// HTTP client for the workflow service.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    api: ApiClient,
}

impl WorkflowClient {
    /// Creates a client over an API transport.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Serialize)]
struct StartRequest<'a> {
    workflow_name: &'a str,
    input: &'a Value,
}

#[async_trait]
impl WorkflowService for WorkflowClient {
    async fn start_execution(&self, workflow: &str, input: &Value) -> Result<Execution> {
        debug!("Starting workflow {workflow}");
        let request = StartRequest {
            workflow_name: workflow,
            input,
        };
        Ok(self.api.post("executions", &request).await?)
    }

    async fn get_execution(&self, id: &str) -> Result<Execution> {
        Ok(self.api.get(&format!("executions/{id}")).await?)
    }

    async fn list_messages(&self, id: &str, after: u64) -> Result<Vec<WorkflowMessage>> {
        #[derive(Deserialize)]
        struct Response {
            messages: Vec<WorkflowMessage>,
        }

        let response: Response = self
            .api
            .get(&format!("executions/{id}/messages?after={after}"))
            .await?;
        Ok(response.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryPolicy;
    use crate::workflow::ExecutionStatus;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WorkflowClient {
        let api = ApiClient::new(SERVICE, &server.uri(), None)
            .unwrap()
            .with_retry(RetryPolicy::none());
        WorkflowClient::new(api)
    }

    #[tokio::test]
    async fn test_start_execution() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/executions"))
            .and(body_partial_json(json!({"workflow_name": "deploy"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "e1",
                "workflow_name": "deploy",
                "input": {"stack": "overcloud"},
                "state": "RUNNING"
            })))
            .mount(&server)
            .await;

        let execution = client(&server)
            .start_execution("deploy", &json!({"stack": "overcloud"}))
            .await
            .unwrap();
        assert_eq!(execution.id, "e1");
        assert_eq!(execution.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_list_messages_after_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/executions/e1/messages"))
            .and(query_param("after", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"seq": 3, "payload": {"message": "done"}}]
            })))
            .mount(&server)
            .await;

        let messages = client(&server).list_messages("e1", 2).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].seq, 3);
    }
}
