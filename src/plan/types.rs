//! Plan document types.
//!
//! A plan holds the template set and a layered parameter set. Layers merge in
//! a fixed order with the last writer winning:
//! 1. environments, in list order
//! 2. generated values (passwords)
//! 3. user parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::PlanStoreError;

use super::references;

/// Parameter name to value.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Template path to content.
pub type Templates = BTreeMap<String, String>;

/// Maximum plan name length.
const MAX_PLAN_NAME_LEN: usize = 255;

/// A named layer of parameter defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    /// Environment name, unique within a plan.
    pub name: String,
    /// Parameter defaults set by this environment.
    pub parameters: Parameters,
}

impl Environment {
    /// Creates an environment.
    #[must_use]
    pub fn new(name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// Where a new environment goes in the layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvironmentPosition {
    /// Ahead of every other environment; anything later overrides it.
    First,
    /// After every other environment.
    #[default]
    Last,
}

/// A stored plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDocument {
    /// Unique plan name.
    pub name: String,
    /// Templates by path.
    pub templates: Templates,
    /// Environment layers in merge order.
    #[serde(default)]
    pub environments: Vec<Environment>,
    /// Generated values.
    #[serde(default)]
    pub generated: Parameters,
    /// User parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl PlanDocument {
    /// Creates a plan with the given templates and user parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, templates: Templates, parameters: Parameters) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            templates,
            environments: Vec::new(),
            generated: Parameters::new(),
            parameters,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the merged parameter mapping.
    #[must_use]
    pub fn merged_parameters(&self) -> Parameters {
        let mut merged = Parameters::new();
        for env in &self.environments {
            merged.extend(env.parameters.clone());
        }
        merged.extend(self.generated.clone());
        merged.extend(self.parameters.clone());
        merged
    }

    /// Returns true if any layer sets `key`.
    #[must_use]
    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
            || self.generated.contains_key(key)
            || self.environments.iter().any(|e| e.parameters.contains_key(key))
    }

    /// Merges `delta` over the user parameters.
    pub fn apply_parameters(&mut self, delta: Parameters) {
        self.parameters.extend(delta);
        self.touch();
    }

    /// Replaces the user parameters.
    pub fn replace_parameters(&mut self, parameters: Parameters) {
        self.parameters = parameters;
        self.touch();
    }

    /// Replaces the templates.
    pub fn replace_templates(&mut self, templates: Templates) {
        self.templates = templates;
        self.touch();
    }

    /// Adds an environment, replacing in place one with the same name.
    pub fn upsert_environment(&mut self, environment: Environment, position: EnvironmentPosition) {
        if let Some(existing) = self
            .environments
            .iter_mut()
            .find(|e| e.name == environment.name)
        {
            *existing = environment;
        } else {
            match position {
                EnvironmentPosition::First => self.environments.insert(0, environment),
                EnvironmentPosition::Last => self.environments.push(environment),
            }
        }
        self.touch();
    }

    /// Removes an environment by name. Returns true if it was present.
    pub fn remove_environment(&mut self, name: &str) -> bool {
        let before = self.environments.len();
        self.environments.retain(|e| e.name != name);
        let removed = self.environments.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Builds the merged export of this plan.
    #[must_use]
    pub fn export(&self) -> PlanExport {
        PlanExport::new(&self.name, self.templates.clone(), self.merged_parameters())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Merged templates and parameters, ready for submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanExport {
    /// Plan name.
    pub name: String,
    /// Templates by path.
    pub templates: Templates,
    /// Merged parameters.
    pub parameters: Parameters,
    /// SHA-256 over templates and parameters, hex encoded.
    pub digest: String,
}

impl PlanExport {
    /// Creates an export and computes its digest.
    #[must_use]
    pub fn new(name: &str, templates: Templates, parameters: Parameters) -> Self {
        let digest = content_digest(&templates, &parameters);
        Self {
            name: name.to_string(),
            templates,
            parameters,
            digest,
        }
    }

    /// Returns a copy with `extra` merged over the parameters.
    #[must_use]
    pub fn with_parameters(&self, extra: &Parameters) -> Self {
        let mut parameters = self.parameters.clone();
        parameters.extend(extra.clone());
        Self::new(&self.name, self.templates.clone(), parameters)
    }

    /// Returns every `template: parameter` reference that does not resolve.
    ///
    /// # Errors
    ///
    /// Returns an error if a YAML template cannot be parsed.
    pub fn unresolved(&self) -> Result<Vec<String>, PlanStoreError> {
        references::unresolved(&self.name, &self.templates, &self.parameters)
    }

    /// Checks that every parameter reference resolves.
    ///
    /// # Errors
    ///
    /// Returns [`PlanStoreError::UnresolvedParameters`] listing every
    /// unresolved reference, or an error if a template cannot be parsed.
    pub fn validate(&self) -> Result<(), PlanStoreError> {
        let unresolved = self.unresolved()?;
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(PlanStoreError::UnresolvedParameters {
                plan: self.name.clone(),
                unresolved,
            })
        }
    }
}

/// Summary of a stored plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSummary {
    /// Plan name.
    pub name: String,
    /// Number of templates.
    pub templates: usize,
    /// Environment names in merge order.
    pub environments: Vec<String>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl From<&PlanDocument> for PlanSummary {
    fn from(doc: &PlanDocument) -> Self {
        Self {
            name: doc.name.clone(),
            templates: doc.templates.len(),
            environments: doc.environments.iter().map(|e| e.name.clone()).collect(),
            updated_at: doc.updated_at,
        }
    }
}

/// Checks a plan name: non-empty, at most 255 characters of `[A-Za-z0-9_.-]`.
///
/// # Errors
///
/// Returns the reason the name is rejected.
pub fn validate_plan_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(String::from("Plan name cannot be empty"));
    }
    if name.len() > MAX_PLAN_NAME_LEN {
        return Err(format!(
            "Plan name is {} characters long; the limit is {MAX_PLAN_NAME_LEN}",
            name.len()
        ));
    }
    if name == "." || name == ".." {
        return Err(String::from("Plan name cannot be a relative path component"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(format!("Plan name contains invalid character '{bad}'"));
    }
    Ok(())
}

fn content_digest(templates: &Templates, parameters: &Parameters) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in templates {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
    }
    if let Ok(bytes) = serde_json::to_vec(parameters) {
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}
