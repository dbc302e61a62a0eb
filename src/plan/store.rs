//! Plan backend trait definition.
//!
//! This module defines the common interface for plan storage backends.

use async_trait::async_trait;

use super::types::PlanDocument;
use crate::error::PlanStoreError;

/// Result type for plan backend operations.
pub type BackendResult<T> = std::result::Result<T, PlanStoreError>;

/// Trait for plan storage backends.
#[async_trait]
pub trait PlanBackend: Send + Sync {
    /// Loads a plan.
    ///
    /// Returns `None` if no plan with this name exists.
    async fn load(&self, name: &str) -> BackendResult<Option<PlanDocument>>;

    /// Saves a plan, replacing any stored version.
    async fn save(&self, plan: &PlanDocument) -> BackendResult<()>;

    /// Deletes a plan. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> BackendResult<bool>;

    /// Checks if a plan exists.
    async fn exists(&self, name: &str) -> BackendResult<bool>;

    /// Lists stored plan names, sorted.
    async fn list(&self) -> BackendResult<Vec<String>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl PlanBackend for Box<dyn PlanBackend> {
    async fn load(&self, name: &str) -> BackendResult<Option<PlanDocument>> {
        (**self).load(name).await
    }

    async fn save(&self, plan: &PlanDocument) -> BackendResult<()> {
        (**self).save(plan).await
    }

    async fn delete(&self, name: &str) -> BackendResult<bool> {
        (**self).delete(name).await
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        (**self).exists(name).await
    }

    async fn list(&self) -> BackendResult<Vec<String>> {
        (**self).list().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
