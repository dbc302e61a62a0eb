//! Plan store client.
//!
//! CRUD over named plans on top of a [`PlanBackend`]. Every backend call is
//! retried on transient failures (once by default); rejections are returned
//! as they are.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{OvercloudError, PlanStoreError, Result};

use super::store::{BackendResult, PlanBackend};
use super::types::{
    validate_plan_name, Environment, EnvironmentPosition, Parameters, PlanDocument, PlanExport,
    Templates,
};

/// Default number of retries after a transient backend error.
const DEFAULT_RETRIES: u32 = 1;

/// Default delay before a retry.
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Length of generated passwords, in hex characters.
const PASSWORD_LEN: usize = 40;

/// Client for the plan store.
#[derive(Debug)]
pub struct PlanStoreClient<B> {
    backend: B,
    retries: u32,
    retry_delay: Duration,
}

impl<B: PlanBackend> PlanStoreClient<B> {
    /// Creates a client over a backend.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// Sets the number of retries after a transient backend error.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Returns the backend type name.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    /// Creates a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::InvalidName`] for a bad name,
    /// [`PlanStoreError::AlreadyExists`] if the name is taken, or a backend error.
    pub async fn create_plan(
        &self,
        name: &str,
        templates: Templates,
        parameters: Parameters,
    ) -> Result<PlanDocument> {
        validate_plan_name(name).map_err(|reason| PlanStoreError::InvalidName {
            name: name.to_string(),
            reason,
        })?;

        if self.retrying("exists", || self.backend.exists(name)).await? {
            return Err(PlanStoreError::AlreadyExists {
                name: name.to_string(),
            }
            .into());
        }

        let plan = PlanDocument::new(name, templates, parameters);
        self.store(&plan).await?;

        info!("Created plan {name} with {} template(s)", plan.templates.len());
        Ok(plan)
    }

    /// Loads a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn get_plan(&self, name: &str) -> Result<PlanDocument> {
        self.retrying("load", || self.backend.load(name))
            .await?
            .ok_or_else(|| {
                PlanStoreError::NotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Returns true if the plan exists.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn plan_exists(&self, name: &str) -> Result<bool> {
        self.retrying("exists", || self.backend.exists(name)).await
    }

    /// Merges `delta` over the user parameters. Last writer wins per key.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn update_parameters(&self, name: &str, delta: Parameters) -> Result<PlanDocument> {
        debug!("Updating {} parameter(s) of plan {name}", delta.len());
        self.modify(name, |plan| plan.apply_parameters(delta)).await
    }

    /// Replaces the templates and user parameters of an existing plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn replace_contents(
        &self,
        name: &str,
        templates: Templates,
        parameters: Parameters,
    ) -> Result<PlanDocument> {
        self.modify(name, |plan| {
            plan.replace_templates(templates);
            plan.replace_parameters(parameters);
        })
        .await
    }

    /// Appends an environment, or replaces in place one with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn merge_environment(
        &self,
        name: &str,
        environment: Environment,
    ) -> Result<PlanDocument> {
        self.place_environment(name, environment, EnvironmentPosition::Last)
            .await
    }

    /// Adds an environment ahead of every other one, so anything already in
    /// the plan overrides it.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn prepend_environment(
        &self,
        name: &str,
        environment: Environment,
    ) -> Result<PlanDocument> {
        self.place_environment(name, environment, EnvironmentPosition::First)
            .await
    }

    async fn place_environment(
        &self,
        name: &str,
        environment: Environment,
        position: EnvironmentPosition,
    ) -> Result<PlanDocument> {
        debug!("Merging environment {} into plan {name}", environment.name);
        self.modify(name, |plan| plan.upsert_environment(environment, position))
            .await
    }

    /// Removes an environment. Removing an absent environment is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn remove_environment(&self, name: &str, environment: &str) -> Result<PlanDocument> {
        let mut plan = self.get_plan(name).await?;
        if plan.remove_environment(environment) {
            self.store(&plan).await?;
        }
        Ok(plan)
    }

    /// Generates passwords for the keys no layer sets yet. Returns the
    /// generated keys.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn generate_passwords(&self, name: &str, keys: &[String]) -> Result<Vec<String>> {
        let mut plan = self.get_plan(name).await?;

        let missing: Vec<String> = keys
            .iter()
            .filter(|key| !plan.has_parameter(key))
            .cloned()
            .collect();

        if missing.is_empty() {
            return Ok(missing);
        }

        for key in &missing {
            plan.generated.insert(key.clone(), generate_password().into());
        }
        plan.updated_at = chrono::Utc::now();
        self.store(&plan).await?;

        info!("Generated {} password(s) for plan {name}", missing.len());
        Ok(missing)
    }

    /// Exports the merged templates and parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::NotFound`] if the plan does not exist.
    pub async fn export_plan(&self, name: &str) -> Result<PlanExport> {
        Ok(self.get_plan(name).await?.export())
    }

    /// Exports the plan and checks every template parameter reference resolves.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::UnresolvedParameters`] or
    /// [`PlanStoreError::NotFound`].
    pub async fn validate_plan(&self, name: &str) -> Result<PlanExport> {
        let export = self.export_plan(name).await?;
        export.validate()?;
        Ok(export)
    }

    /// Deletes a plan. Deleting an absent plan succeeds and returns false.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn delete_plan(&self, name: &str) -> Result<bool> {
        let deleted = self.retrying("delete", || self.backend.delete(name)).await?;
        if deleted {
            info!("Deleted plan {name}");
        } else {
            debug!("Plan {name} was already absent");
        }
        Ok(deleted)
    }

    /// Lists plan names.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn list_plans(&self) -> Result<Vec<String>> {
        self.retrying("list", || self.backend.list()).await
    }

    async fn modify<F>(&self, name: &str, change: F) -> Result<PlanDocument>
    where
        F: FnOnce(&mut PlanDocument),
    {
        let mut plan = self.get_plan(name).await?;
        change(&mut plan);
        self.store(&plan).await?;
        Ok(plan)
    }

    async fn store(&self, plan: &PlanDocument) -> Result<()> {
        self.retrying("save", || self.backend.save(plan)).await
    }

    /// Runs a backend call, retrying transient failures.
    async fn retrying<T, F, Fut>(&self, action: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(PlanStoreError::Backend {
                    transient: true,
                    ref message,
                    ..
                }) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Plan {action} failed ({message}), retry {attempt} of {}",
                        self.retries
                    );
                    tokio::time::sleep(self.retry_delay.saturating_mul(attempt)).await;
                }
                Err(e) => return Err(OvercloudError::Plan(e)),
            }
        }
    }
}

/// Returns a random 40-character hex string.
fn generate_password() -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    hex.push_str(&uuid::Uuid::new_v4().simple().to_string());
    hex.truncate(PASSWORD_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::plan::LocalPlanBackend;
    use crate::testing::FlakyPlanBackend;
    use serde_json::json;
    use tempfile::TempDir;

    fn client() -> (PlanStoreClient<LocalPlanBackend>, TempDir) {
        let dir = TempDir::new().unwrap();
        let client = PlanStoreClient::new(LocalPlanBackend::with_base_dir(dir.path()));
        (client, dir)
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_then_export_round_trips() {
        let (client, _dir) = client();
        let input = params(&[
            ("ControllerCount", json!(3)),
            ("NtpServer", json!("pool.ntp.org")),
            ("Flags", json!({"debug": true})),
        ]);

        client
            .create_plan("overcloud", Templates::new(), input.clone())
            .await
            .unwrap();
        let export = client.export_plan("overcloud").await.unwrap();

        assert_eq!(export.parameters, input);
        assert_eq!(export.name, "overcloud");
    }

    #[tokio::test]
    async fn test_create_rejects_taken_and_bad_names() {
        let (client, _dir) = client();
        client
            .create_plan("overcloud", Templates::new(), Parameters::new())
            .await
            .unwrap();

        let err = client
            .create_plan("overcloud", Templates::new(), Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OvercloudError::Plan(PlanStoreError::AlreadyExists { .. })));

        let err = client
            .create_plan("../etc", Templates::new(), Parameters::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_update_parameters_is_idempotent() {
        let (client, _dir) = client();
        client
            .create_plan(
                "overcloud",
                Templates::new(),
                params(&[("A", json!(1)), ("B", json!(2))]),
            )
            .await
            .unwrap();

        let delta = params(&[("B", json!(20)), ("C", json!(30))]);
        let once = client.update_parameters("overcloud", delta.clone()).await.unwrap();
        let twice = client.update_parameters("overcloud", delta).await.unwrap();

        assert_eq!(once.parameters, twice.parameters);
        assert_eq!(
            twice.parameters,
            params(&[("A", json!(1)), ("B", json!(20)), ("C", json!(30))])
        );
    }

    #[tokio::test]
    async fn test_missing_plan_errors() {
        let (client, _dir) = client();

        let err = client
            .update_parameters("ghost", Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OvercloudError::Plan(PlanStoreError::NotFound { .. })));
        assert!(client.export_plan("ghost").await.is_err());
        assert!(!client.delete_plan("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_generate_passwords_skips_existing_keys() {
        let (client, _dir) = client();
        client
            .create_plan(
                "overcloud",
                Templates::new(),
                params(&[("AdminPassword", json!("chosen"))]),
            )
            .await
            .unwrap();

        let keys = vec![String::from("AdminPassword"), String::from("RabbitPassword")];
        let generated = client.generate_passwords("overcloud", &keys).await.unwrap();
        assert_eq!(generated, ["RabbitPassword"]);

        let export = client.export_plan("overcloud").await.unwrap();
        assert_eq!(export.parameters["AdminPassword"], json!("chosen"));
        let rabbit = export.parameters["RabbitPassword"].as_str().unwrap();
        assert_eq!(rabbit.len(), 40);
        assert!(rabbit.chars().all(|c| c.is_ascii_hexdigit()));

        let again = client.generate_passwords("overcloud", &keys).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_environment_layers() {
        let (client, _dir) = client();
        client
            .create_plan("overcloud", Templates::new(), Parameters::new())
            .await
            .unwrap();
        client
            .merge_environment(
                "overcloud",
                Environment::new("network", params(&[("Mtu", json!(1500))])),
            )
            .await
            .unwrap();
        client
            .prepend_environment(
                "overcloud",
                Environment::new("prepare", params(&[("Mtu", json!(9000))])),
            )
            .await
            .unwrap();

        let export = client.export_plan("overcloud").await.unwrap();
        assert_eq!(export.parameters["Mtu"], json!(1500));

        client.remove_environment("overcloud", "network").await.unwrap();
        client.remove_environment("overcloud", "network").await.unwrap();
        let export = client.export_plan("overcloud").await.unwrap();
        assert_eq!(export.parameters["Mtu"], json!(9000));
    }

    #[tokio::test]
    async fn test_validate_plan_lists_unresolved() {
        let (client, _dir) = client();
        let templates: Templates = [(
            String::from("overcloud.yaml"),
            String::from("resources:\n  a: { properties: { x: { get_param: NtpServer } } }\n"),
        )]
        .into_iter()
        .collect();
        client
            .create_plan("overcloud", templates, Parameters::new())
            .await
            .unwrap();

        let err = client.validate_plan("overcloud").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(err.to_string().contains("overcloud.yaml: NtpServer"));

        client
            .update_parameters("overcloud", params(&[("NtpServer", json!("pool.ntp.org"))]))
            .await
            .unwrap();
        assert!(client.validate_plan("overcloud").await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let backend = FlakyPlanBackend::new(1, true);
        let client = PlanStoreClient::new(backend).with_retries(1, Duration::from_millis(1));

        assert!(client.list_plans().await.is_ok());
    }

    #[tokio::test]
    async fn test_second_transient_failure_is_surfaced() {
        let backend = FlakyPlanBackend::new(2, true);
        let client = PlanStoreClient::new(backend).with_retries(1, Duration::from_millis(1));

        let err = client.list_plans().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let backend = FlakyPlanBackend::new(1, false);
        let client = PlanStoreClient::new(backend).with_retries(3, Duration::from_millis(1));

        assert!(client.list_plans().await.is_err());
    }
}
