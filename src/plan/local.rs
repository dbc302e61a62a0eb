//! Local file-based plan backend.
//!
//! Stores one JSON document per plan in a directory. Writes go through a
//! temporary file and a rename so a crash never leaves a half-written plan.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{OvercloudError, PlanStoreError, Result};

use super::store::{BackendResult, PlanBackend};
use super::types::PlanDocument;

/// Default plan directory, relative to the working directory.
const PLAN_DIR: &str = ".overcloud/plans";

/// Plan file extension.
const PLAN_EXT: &str = "json";

/// Backend type name.
const BACKEND: &str = "local";

/// Local file-based plan backend.
#[derive(Debug)]
pub struct LocalPlanBackend {
    /// Directory holding the plan files.
    base_dir: PathBuf,
}

impl LocalPlanBackend {
    /// Creates a backend rooted at `.overcloud/plans` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                OvercloudError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(PLAN_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a backend with a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the plan directory.
    #[must_use]
    pub const fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    fn plan_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.{PLAN_EXT}"))
    }

    async fn ensure_dir(&self) -> BackendResult<()> {
        if !self.base_dir.exists() {
            debug!("Creating plan directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| io_error("create plan directory", &e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PlanBackend for LocalPlanBackend {
    async fn load(&self, name: &str) -> BackendResult<Option<PlanDocument>> {
        let path = self.plan_path(name);
        if !path.exists() {
            debug!("Plan file does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| io_error("read plan file", &e))?;

        let plan: PlanDocument =
            serde_json::from_str(&content).map_err(|e| PlanStoreError::Corrupted {
                message: format!("{}: {e}", path.display()),
            })?;

        Ok(Some(plan))
    }

    async fn save(&self, plan: &PlanDocument) -> BackendResult<()> {
        self.ensure_dir().await?;

        let path = self.plan_path(&plan.name);
        info!("Saving plan {} to: {}", plan.name, path.display());

        let content = serde_json::to_string_pretty(plan).map_err(|e| {
            PlanStoreError::serialization(format!("Failed to serialize plan: {e}"))
        })?;

        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error("create temp plan file", &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_error("write plan file", &e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("sync plan file", &e))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error("rename plan file", &e))?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> BackendResult<bool> {
        let path = self.plan_path(name);
        if !path.exists() {
            return Ok(false);
        }

        info!("Deleting plan file: {}", path.display());
        fs::remove_file(&path)
            .await
            .map_err(|e| io_error("delete plan file", &e))?;
        Ok(true)
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        Ok(self.plan_path(name).exists())
    }

    async fn list(&self) -> BackendResult<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| io_error("list plan directory", &e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list plan directory", &e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PLAN_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    fn backend_type(&self) -> &'static str {
        BACKEND
    }
}

/// Local filesystem failures are never worth retrying.
fn io_error(action: &str, e: &std::io::Error) -> PlanStoreError {
    PlanStoreError::backend(BACKEND, format!("Failed to {action}: {e}"), false)
}
