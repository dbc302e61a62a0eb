//! Configuration parser for loading configuration files.
//!
//! Loads `overcloud.deploy.yaml`, applies `OVERCLOUD_*` environment overrides
//! and reads the optional `.env` file.

use crate::error::{ConfigError, OvercloudError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Environment variable holding the bearer token for the remote services.
pub const AUTH_TOKEN_VAR: &str = "OVERCLOUD_AUTH_TOKEN";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative plan paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(OvercloudError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            OvercloudError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;

        let base = self
            .base_path
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf));
        if let Some(base) = base {
            Self::resolve_paths(&mut config, &base);
        }

        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            OvercloudError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration for stack: {}", config.stack.name);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognised variables: `OVERCLOUD_STACK_NAME`, `OVERCLOUD_PLAN_NAME`,
    /// `OVERCLOUD_PLAN_STORE_BUCKET` and `OVERCLOUD_PLAN_STORE_PREFIX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut DeployConfig) {
        if let Ok(name) = std::env::var("OVERCLOUD_STACK_NAME") {
            debug!("Overriding stack.name from environment");
            config.stack.name = name;
        }

        if let Ok(name) = std::env::var("OVERCLOUD_PLAN_NAME") {
            debug!("Overriding plan.name from environment");
            config.plan.name = Some(name);
        }

        if let Ok(bucket) = std::env::var("OVERCLOUD_PLAN_STORE_BUCKET") {
            debug!("Overriding plan_store.bucket from environment");
            config.plan_store.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("OVERCLOUD_PLAN_STORE_PREFIX") {
            debug!("Overriding plan_store.prefix from environment");
            config.plan_store.prefix = Some(prefix);
        }
    }

    /// Makes relative plan paths absolute with respect to `base`.
    fn resolve_paths(config: &mut DeployConfig, base: &Path) {
        if config.plan.templates_dir.is_relative() {
            config.plan.templates_dir = base.join(&config.plan.templates_dir);
        }

        for env in &mut config.plan.environments {
            if env.is_relative() {
                *env = base.join(&*env);
            }
        }

        if let Some(path) = &mut config.plan_store.path
            && path.is_relative()
        {
            *path = base.join(&*path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                OvercloudError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the bearer token for the remote services, if set.
    #[must_use]
    pub fn auth_token() -> Option<String> {
        std::env::var(AUTH_TOKEN_VAR).ok().filter(|t| !t.is_empty())
    }

    /// Gets the bearer token, failing if it is not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn require_auth_token() -> Result<String> {
        Self::auth_token().ok_or_else(|| {
            OvercloudError::Config(ConfigError::MissingEnvVar {
                name: String::from(AUTH_TOKEN_VAR),
            })
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "overcloud.deploy.yaml",
    "overcloud.deploy.yml",
    "deploy.yaml",
    "deploy.yml",
];

/// Finds the configuration file in the start directory, its parents, or the
/// user configuration directory (`~/.config/overcloud/`).
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        if let Some(found) = first_existing(&current) {
            return Ok(found);
        }

        if !current.pop() {
            break;
        }
    }

    if let Some(found) = dirs::config_dir()
        .map(|d| d.join("overcloud"))
        .and_then(|d| first_existing(&d))
    {
        return Ok(found);
    }

    Err(OvercloudError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
        .inspect(|path| info!("Found configuration file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{PlanBackendKind, RoleKind};

    const MINIMAL: &str = r"
services:
  orchestration: http://localhost:8004
  provisioning: http://localhost:6385
  workflow: http://localhost:8989
";

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();

        assert_eq!(config.stack_name(), "overcloud");
        assert_eq!(config.plan_name(), "overcloud");
        assert_eq!(config.plan_store.backend, PlanBackendKind::Local);
        assert_eq!(config.polling.interval_secs, 10);
        assert!(config.workflows.config_download.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
stack: { name: prod }
plan:
  name: prod-plan
  templates_dir: ./tht
  environments: [ ./environments/network.yaml ]
  parameters: { ControllerCount: 3, NtpServer: pool.ntp.org }
  generated_passwords: [ AdminPassword ]
plan_store: { backend: s3, bucket: plans, prefix: prod/ }
services:
  orchestration: https://orchestration
  provisioning: https://provisioning
  workflow: https://workflow
polling: { interval_secs: 5, max_wait_secs: 600 }
concurrency: { max_parallel_nodes: 4 }
roles:
  - { name: Controller, kind: control_plane }
  - { name: Compute, kind: compute }
workflows:
  config_download: tripleo.deployment.v1.config_download_deploy
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();

        assert_eq!(config.plan_name(), "prod-plan");
        assert_eq!(config.plan.parameters["ControllerCount"], 3);
        assert_eq!(config.plan_store.bucket.as_deref(), Some("plans"));
        assert_eq!(config.role_kind("Controller"), RoleKind::ControlPlane);
        assert_eq!(config.concurrency.max_parallel_nodes, 4);
    }

    #[test]
    fn test_missing_services_is_a_parse_error() {
        let result = ConfigParser::new().parse_yaml("stack: { name: x }", None);
        assert!(matches!(
            result,
            Err(OvercloudError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_relative_paths_resolve_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overcloud.deploy.yaml");
        std::fs::write(&path, format!("{MINIMAL}plan: {{ environments: [ env.yaml ] }}\n"))
            .unwrap();

        let config = ConfigParser::new().load_file(&path).unwrap();
        assert_eq!(config.plan.templates_dir, dir.path().join("templates"));
        assert_eq!(config.plan.environments[0], dir.path().join("env.yaml"));
    }

    #[test]
    fn test_find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("overcloud.deploy.yaml"), MINIMAL).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("overcloud.deploy.yaml"));
    }
}
