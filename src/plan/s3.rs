//! S3-based plan backend.
//!
//! Stores each plan as `<prefix><name>/plan.json` in a bucket, so plans can be
//! shared between operators and machines.

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{PlanStoreError, Result};

use super::store::{BackendResult, PlanBackend};
use super::types::PlanDocument;

/// Plan object key suffix.
const PLAN_KEY: &str = "plan.json";

/// Backend type name.
const BACKEND: &str = "s3";

/// S3-based plan backend.
#[derive(Debug)]
pub struct S3PlanBackend {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

impl S3PlanBackend {
    /// Creates a backend using the AWS default credential chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a backend with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the object key for a plan.
    fn key(&self, name: &str) -> String {
        format!("{}{name}/{PLAN_KEY}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> BackendResult<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    PlanStoreError::backend(BACKEND, format!("Failed to read S3 object: {e}"), true)
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    PlanStoreError::Corrupted {
                        message: format!("Invalid UTF-8 in s3://{}/{key}: {e}", self.bucket),
                    }
                })?;

                Ok(Some(content))
            }
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_no_such_key() => Ok(None),
            Err(e) => Err(sdk_error("get", &e)),
        }
    }

    async fn object_exists(&self, key: &str) -> BackendResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
            Err(e) => Err(sdk_error("head", &e)),
        }
    }
}

#[async_trait]
impl PlanBackend for S3PlanBackend {
    async fn load(&self, name: &str) -> BackendResult<Option<PlanDocument>> {
        let key = self.key(name);
        debug!("Loading plan from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No plan {name} in S3");
            return Ok(None);
        };

        let plan = serde_json::from_str(&json).map_err(|e| PlanStoreError::Corrupted {
            message: format!("s3://{}/{key}: {e}", self.bucket),
        })?;

        Ok(Some(plan))
    }

    async fn save(&self, plan: &PlanDocument) -> BackendResult<()> {
        let key = self.key(&plan.name);
        info!("Saving plan to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(plan).map_err(|e| {
            PlanStoreError::serialization(format!("Failed to serialize plan: {e}"))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| sdk_error("put", &e))?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> BackendResult<bool> {
        let key = self.key(name);
        if !self.object_exists(&key).await? {
            return Ok(false);
        }

        info!("Deleting plan s3://{}/{key}", self.bucket);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| sdk_error("delete", &e))?;

        Ok(true)
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        self.object_exists(&self.key(name)).await
    }

    async fn list(&self) -> BackendResult<Vec<String>> {
        let mut names = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error("list", &e))?;

            names.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| plan_name_from_key(&self.prefix, key)),
            );

            match output.next_continuation_token() {
                Some(next) if output.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }

    fn backend_type(&self) -> &'static str {
        BACKEND
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

/// Extracts the plan name from `<prefix><name>/plan.json`.
fn plan_name_from_key(prefix: &str, key: &str) -> Option<String> {
    let name = key
        .strip_prefix(prefix)?
        .strip_suffix(PLAN_KEY)?
        .strip_suffix('/')?;
    (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
}

/// Maps an SDK error. Dispatch failures, timeouts and 5xx responses are transient.
fn sdk_error<E: std::error::Error>(action: &str, err: &SdkError<E>) -> PlanStoreError {
    let transient = match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => ctx.raw().status().is_server_error(),
        _ => false,
    };
    PlanStoreError::backend(BACKEND, format!("S3 {action} error: {err}"), transient)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/prod/plans/")), "prod/plans/");
    }

    #[test]
    fn test_plan_name_from_key() {
        assert_eq!(
            plan_name_from_key("prod/", "prod/overcloud/plan.json").as_deref(),
            Some("overcloud")
        );
        assert_eq!(plan_name_from_key("", "overcloud/plan.json").as_deref(), Some("overcloud"));
        assert!(plan_name_from_key("prod/", "prod/overcloud/other.json").is_none());
        assert!(plan_name_from_key("prod/", "prod/a/b/plan.json").is_none());
        assert!(plan_name_from_key("prod/", "prod/plan.json").is_none());
    }
}
