//! Loading plan contents from disk.
//!
//! Templates come from a directory tree, keyed by their path relative to the
//! tree root. Environment files are YAML documents whose `parameter_defaults`
//! (and legacy `parameters`) sections become environment layers.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{ConfigError, OvercloudError, Result};

use super::types::{Environment, Parameters, Templates};

/// Plan contents read from disk.
#[derive(Debug, Clone, Default)]
pub struct PlanSources {
    /// Templates by relative path.
    pub templates: Templates,
    /// Environment layers in file order.
    pub environments: Vec<Environment>,
}

impl PlanSources {
    /// Reads the templates directory and environment files.
    ///
    /// # Errors
    ///
    /// Returns an error if the templates directory or an environment file
    /// cannot be read or parsed.
    pub async fn load(templates_dir: &Path, environment_files: &[PathBuf]) -> Result<Self> {
        let templates = load_templates(templates_dir).await?;

        let mut environments = Vec::with_capacity(environment_files.len());
        for path in environment_files {
            environments.push(load_environment(path).await?);
        }

        debug!(
            "Loaded {} template(s) and {} environment(s)",
            templates.len(),
            environments.len()
        );
        Ok(Self {
            templates,
            environments,
        })
    }
}

/// Reads every UTF-8 file under `root`.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub async fn load_templates(root: &Path) -> Result<Templates> {
    if !root.is_dir() {
        return Err(OvercloudError::Config(ConfigError::FileNotFound {
            path: root.to_path_buf(),
        }));
    }

    let mut templates = Templates::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            match fs::read_to_string(&path).await {
                Ok(content) => {
                    templates.insert(key, content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!("Skipping non-UTF-8 template file {}", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(templates)
}

/// Reads one environment file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a YAML mapping.
pub async fn load_environment(path: &Path) -> Result<Environment> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        OvercloudError::Config(ConfigError::ParseError {
            message: format!("Failed to read environment file: {e}"),
            location: Some(path.display().to_string()),
        })
    })?;

    let parameters = parse_environment(&content).map_err(|message| {
        OvercloudError::Config(ConfigError::ParseError {
            message,
            location: Some(path.display().to_string()),
        })
    })?;

    Ok(Environment::new(path.display().to_string(), parameters))
}

/// Extracts parameter defaults from an environment document.
///
/// `parameter_defaults` wins over `parameters` for keys set in both.
fn parse_environment(content: &str) -> std::result::Result<Parameters, String> {
    #[derive(serde::Deserialize, Default)]
    #[serde(default)]
    struct EnvironmentFile {
        parameters: Parameters,
        parameter_defaults: Parameters,
    }

    if content.trim().is_empty() {
        return Ok(Parameters::new());
    }

    let file: EnvironmentFile =
        serde_yaml::from_str(content).map_err(|e| format!("YAML parse error: {e}"))?;

    let mut parameters = file.parameters;
    parameters.extend(file.parameter_defaults);
    Ok(parameters)
}
