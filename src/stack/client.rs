//! Orchestration service interface and its HTTP client.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::api::ApiClient;
use crate::error::Result;

use super::types::{StackEvent, StackRecord, StackResource, StackSubmission};

/// Service name used in errors and logs.
pub const SERVICE: &str = "orchestration";

/// Raw operations of the stack orchestration service.
#[async_trait]
pub trait OrchestrationService: Send + Sync {
    /// Gets a stack. Returns `None` if it does not exist.
    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>>;

    /// Submits a stack creation.
    async fn create_stack(&self, submission: &StackSubmission) -> Result<()>;

    /// Submits a stack update.
    async fn update_stack(&self, submission: &StackSubmission) -> Result<()>;

    /// Submits a stack deletion. Returns false if the stack did not exist.
    async fn delete_stack(&self, name: &str) -> Result<bool>;

    /// Lists the stack's resources.
    async fn list_resources(&self, name: &str) -> Result<Vec<StackResource>>;

    /// Lists the stack's events, oldest first.
    async fn list_events(&self, name: &str) -> Result<Vec<StackEvent>>;
}

#[async_trait]
impl OrchestrationService for Box<dyn OrchestrationService> {
    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>> {
        (**self).get_stack(name).await
    }

    async fn create_stack(&self, submission: &StackSubmission) -> Result<()> {
        (**self).create_stack(submission).await
    }

    async fn update_stack(&self, submission: &StackSubmission) -> Result<()> {
        (**self).update_stack(submission).await
    }

    async fn delete_stack(&self, name: &str) -> Result<bool> {
        (**self).delete_stack(name).await
    }

    async fn list_resources(&self, name: &str) -> Result<Vec<StackResource>> {
        (**self).list_resources(name).await
    }

    async fn list_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        (**self).list_events(name).await
    }
}

/// HTTP client for the orchestration service.
#[derive(Debug, Clone)]
pub struct OrchestrationClient {
    api: ApiClient,
}

impl OrchestrationClient {
    /// Creates a client over an API transport.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl OrchestrationService for OrchestrationClient {
    async fn get_stack(&self, name: &str) -> Result<Option<StackRecord>> {
        #[derive(Deserialize)]
        struct Response {
            stack: StackRecord,
        }

        let response: Option<Response> = self.api.get_optional(&format!("stacks/{name}")).await?;
        Ok(response.map(|r| r.stack))
    }

    async fn create_stack(&self, submission: &StackSubmission) -> Result<()> {
        debug!("POST stack {}", submission.stack_name);
        let _: serde_json::Value = self.api.post("stacks", submission).await?;
        Ok(())
    }

    async fn update_stack(&self, submission: &StackSubmission) -> Result<()> {
        debug!("PUT stack {}", submission.stack_name);
        let _: serde_json::Value = self
            .api
            .put(&format!("stacks/{}", submission.stack_name), submission)
            .await?;
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> Result<bool> {
        Ok(self.api.delete(&format!("stacks/{name}")).await?)
    }

    async fn list_resources(&self, name: &str) -> Result<Vec<StackResource>> {
        #[derive(Deserialize)]
        struct Response {
            resources: Vec<StackResource>,
        }

        let response: Response = self.api.get(&format!("stacks/{name}/resources")).await?;
        Ok(response.resources)
    }

    async fn list_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        #[derive(Deserialize)]
        struct Response {
            events: Vec<StackEvent>,
        }

        let response: Response = self.api.get(&format!("stacks/{name}/events")).await?;
        Ok(response.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryPolicy;
    use crate::error::FailureKind;
    use crate::plan::{Parameters, Templates};
    use crate::stack::StackStatus;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OrchestrationClient {
        let api = ApiClient::new(SERVICE, &server.uri(), None)
            .unwrap()
            .with_retry(RetryPolicy::none());
        OrchestrationClient::new(api)
    }

    fn submission() -> StackSubmission {
        StackSubmission {
            stack_name: String::from("overcloud"),
            files: Templates::new(),
            parameters: Parameters::new(),
            plan_digest: String::from("abc"),
        }
    }

    #[tokio::test]
    async fn test_get_stack() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks/overcloud"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "stack": {
                    "stack_name": "overcloud",
                    "stack_status": "UPDATE_IN_PROGRESS",
                    "stack_status_reason": "Stack UPDATE started"
                }
            })))
            .mount(&server)
            .await;

        let stack = client(&server).get_stack("overcloud").await.unwrap().unwrap();
        assert_eq!(stack.status, StackStatus::UpdateInProgress);
    }

    #[tokio::test]
    async fn test_get_absent_stack() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).get_stack("overcloud").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_conflict_surfaces_as_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/stacks/overcloud"))
            .respond_with(ResponseTemplate::new(409).set_body_string("Stack is in progress"))
            .mount(&server)
            .await;

        let err = client(&server).update_stack(&submission()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stacks"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).create_stack(&submission()).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks/overcloud/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{
                    "resource_name": "Controller",
                    "resource_status": "CREATE_FAILED",
                    "resource_status_reason": "timeout",
                    "event_time": "2024-05-01T10:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let events = client(&server).list_events("overcloud").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource_status, StackStatus::CreateFailed);
    }
}
