//! Configuration validation.
//!
//! Checks names, endpoints, timing and role definitions before any remote
//! service is contacted.

use crate::error::{ConfigError, OvercloudError, Result};
use crate::plan::validate_plan_name;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    DeployConfig, LifecycleConfig, PlanBackendKind, PlanStoreConfig, PollingConfig, RoleConfig,
    ServicesConfig,
};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(OvercloudError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Runs every check and collects errors and warnings.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_names(config, &mut result);
        Self::validate_plan_store(&config.plan_store, &mut result);
        Self::validate_services(&config.services, &mut result);
        Self::validate_polling(&config.polling, &mut result);
        Self::validate_roles(&config.roles, &mut result);
        Self::validate_lifecycle(&config.lifecycle, &mut result);

        if config.concurrency.max_parallel_nodes == 0 {
            result.error(
                "concurrency.max_parallel_nodes",
                "At least one node request must be allowed in flight",
            );
        }

        let mut seen = HashSet::new();
        for (i, key) in config.plan.generated_passwords.iter().enumerate() {
            if !seen.insert(key) {
                result.error(
                    format!("plan.generated_passwords[{i}]"),
                    format!("Duplicate generated parameter: {key}"),
                );
            }
        }

        result
    }

    fn validate_names(config: &DeployConfig, result: &mut ValidationResult) {
        if !is_valid_stack_name(&config.stack.name) {
            result.error(
                "stack.name",
                format!(
                    "Stack name '{}' is invalid. Must start with a letter and contain only letters, digits, '_', '-' or '.'",
                    config.stack.name
                ),
            );
        }

        if let Err(reason) = validate_plan_name(config.plan_name()) {
            result.error("plan.name", reason);
        }
    }

    fn validate_plan_store(store: &PlanStoreConfig, result: &mut ValidationResult) {
        match store.backend {
            PlanBackendKind::S3 => {
                if store.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "plan_store.bucket",
                        "S3 bucket name is required when using the s3 backend",
                    );
                }
            }
            PlanBackendKind::Local => {
                if store.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("plan_store.bucket is ignored by the local backend"));
                }
            }
        }

        if store.retries > 5 {
            result.warnings.push(format!(
                "plan_store.retries: {} retries may hide a persistent backend failure",
                store.retries
            ));
        }
    }

    fn validate_services(services: &ServicesConfig, result: &mut ValidationResult) {
        for (field, url) in [
            ("services.orchestration", &services.orchestration),
            ("services.provisioning", &services.provisioning),
            ("services.workflow", &services.workflow),
        ] {
            if url.is_empty() {
                result.error(field, "Service URL cannot be empty");
            } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                result.error(field, format!("Service URL must use http or https: {url}"));
            }
        }

        if services.request_timeout_secs == 0 {
            result.error(
                "services.request_timeout_secs",
                "Request timeout must be at least 1 second",
            );
        }
    }

    fn validate_polling(polling: &PollingConfig, result: &mut ValidationResult) {
        if polling.interval_secs == 0 {
            result.error("polling.interval_secs", "Poll interval must be positive");
        }

        if polling.max_wait_secs < polling.interval_secs {
            result.error(
                "polling.max_wait_secs",
                format!(
                    "Maximum wait ({}s) is shorter than the poll interval ({}s)",
                    polling.max_wait_secs, polling.interval_secs
                ),
            );
        }
    }

    fn validate_roles(roles: &[RoleConfig], result: &mut ValidationResult) {
        if roles.is_empty() {
            result
                .warnings
                .push(String::from("No roles defined; role-scoped runs are unavailable"));
            return;
        }

        let mut seen = HashSet::new();
        for (i, role) in roles.iter().enumerate() {
            if role.name.is_empty() {
                result.error(format!("roles[{i}].name"), "Role name cannot be empty");
            } else if !seen.insert(role.name.as_str()) {
                result.error(
                    format!("roles[{i}].name"),
                    format!("Duplicate role name: {}", role.name),
                );
            }
        }

        if !roles.iter().any(|r| r.kind.is_control_plane()) {
            result.warnings.push(String::from(
                "No control_plane role defined; upgrades will not order any role first",
            ));
        }
    }

    fn validate_lifecycle(lifecycle: &LifecycleConfig, result: &mut ValidationResult) {
        if lifecycle.ffwd_upgrade.release_skip.is_empty() {
            result.warnings.push(String::from(
                "lifecycle.ffwd_upgrade.release_skip is empty; ffwd-upgrade prepare will not check the upgrade path",
            ));
        }

        for key in lifecycle.ffwd_upgrade.release_skip.keys() {
            if key.is_empty() {
                result.error(
                    "lifecycle.ffwd_upgrade.release_skip",
                    "Release-skip parameter names cannot be empty",
                );
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates a stack name: a letter followed by letters, digits, `_`, `-` or `.`.
fn is_valid_stack_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }

    name.len() <= 255 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::RoleKind;

    fn config() -> DeployConfig {
        serde_yaml::from_str(
            r"
services:
  orchestration: http://orchestration:8004
  provisioning: http://provisioning:6385
  workflow: http://workflow:8989
roles:
  - { name: Controller, kind: control_plane }
  - { name: Compute, kind: compute }
",
        )
        .unwrap()
    }

    #[test]
    fn test_valid_stack_name() {
        assert!(is_valid_stack_name("overcloud"));
        assert!(is_valid_stack_name("Overcloud_2.east-1"));
        assert!(!is_valid_stack_name(""));
        assert!(!is_valid_stack_name("1overcloud"));
        assert!(!is_valid_stack_name("over cloud"));
    }

    #[test]
    fn test_minimal_config_is_valid() {
        let result = ConfigValidator::new().validate(&config()).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let mut config = config();
        config.roles.push(RoleConfig {
            name: String::from("Compute"),
            kind: RoleKind::Compute,
        });

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("Duplicate role"));
    }

    #[test]
    fn test_polling_bounds() {
        let mut config = config();
        config.polling.interval_secs = 30;
        config.polling.max_wait_secs = 10;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = config();
        config.plan_store.backend = PlanBackendKind::S3;

        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "plan_store.bucket"));
    }

    #[test]
    fn test_service_urls_need_scheme() {
        let mut config = config();
        config.services.workflow = String::from("workflow:8989");

        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "services.workflow"));
    }
}
