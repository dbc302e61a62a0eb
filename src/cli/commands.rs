//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::orchestrator::RunScope;

/// Overcloud - phased deployment, update and upgrade orchestrator.
#[derive(Parser, Debug)]
#[command(name = "overcloud")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "OVERCLOUD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "OVERCLOUD_LOG_JSON")]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the deployment configuration.
    Validate {
        /// Show warnings too.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Manage deployment plans.
    Plan {
        /// Plan subcommand.
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Stage the plan and create or update the stack.
    Deploy,

    /// Minor update of the overcloud.
    Update {
        /// Lifecycle stage.
        #[command(subcommand)]
        stage: LifecycleStage,
    },

    /// Major upgrade of the overcloud.
    Upgrade {
        /// Lifecycle stage.
        #[command(subcommand)]
        stage: LifecycleStage,
    },

    /// Fast-forward upgrade across several releases.
    FfwdUpgrade {
        /// Lifecycle stage.
        #[command(subcommand)]
        stage: LifecycleStage,

        /// Skip confirmation prompt.
        #[arg(short, long, global = true)]
        yes: bool,
    },

    /// Delete the stack. The plan is kept.
    Delete {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the stack status and failed resources.
    Status,

    /// Manage bare-metal nodes.
    Node {
        /// Node subcommand.
        #[command(subcommand)]
        command: NodeCommands,
    },
}

/// Plan management subcommands.
#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// Create the plan from the configured templates and environments.
    Create,

    /// Merge parameter changes into the plan.
    Update {
        /// Parameter changes.
        #[command(flatten)]
        parameters: ParameterArgs,
    },

    /// Print the merged plan.
    Export {
        /// Write the export to a file instead of stdout.
        #[arg(short = 'O', long = "out")]
        out: Option<PathBuf>,

        /// Fail if a template references an unset parameter.
        #[arg(long)]
        validate: bool,
    },

    /// Delete the plan.
    Delete {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List stored plans.
    List,
}

/// Stages of update, upgrade and fast-forward upgrade.
#[derive(Subcommand, Debug)]
pub enum LifecycleStage {
    /// Stage the plan for the operation without touching the stack.
    Prepare {
        /// Parameter changes staged with the operation.
        #[command(flatten)]
        parameters: ParameterArgs,
    },

    /// Roll the operation out batch by batch.
    Run {
        /// Only these roles, one batch per role.
        #[arg(long, value_delimiter = ',', conflicts_with = "nodes")]
        roles: Vec<String>,

        /// Only these nodes, as a single batch.
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,
    },

    /// Reconcile the whole overcloud with the final plan.
    Converge,
}

impl LifecycleStage {
    /// Returns the scope selected for `run`.
    #[must_use]
    pub fn scope(roles: &[String], nodes: &[String]) -> RunScope {
        if !nodes.is_empty() {
            RunScope::Nodes(nodes.to_vec())
        } else if !roles.is_empty() {
            RunScope::Roles(roles.to_vec())
        } else {
            RunScope::All
        }
    }
}

/// Parameter changes given on the command line.
#[derive(Args, Debug, Default)]
pub struct ParameterArgs {
    /// Set a parameter (`KEY=VALUE`, value parsed as YAML).
    #[arg(short, long = "set", value_parser = parse_parameter)]
    pub set: Vec<(String, Value)>,

    /// YAML file of parameters to merge.
    #[arg(short = 'f', long = "parameters-file")]
    pub file: Option<PathBuf>,
}

/// Node management subcommands.
#[derive(Subcommand, Debug)]
pub enum NodeCommands {
    /// List registered nodes.
    List,

    /// Register nodes from a YAML file and take them under management.
    Import {
        /// YAML list of node registrations.
        file: PathBuf,
    },

    /// Run hardware introspection.
    Introspect {
        /// Target nodes.
        #[command(flatten)]
        targets: NodeTargets,
    },

    /// Make nodes available for deployment.
    Provide {
        /// Target nodes.
        #[command(flatten)]
        targets: NodeTargets,
    },

    /// Clean node disks.
    Clean {
        /// Target nodes.
        #[command(flatten)]
        targets: NodeTargets,
    },
}

/// Nodes a command applies to.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct NodeTargets {
    /// Node identifiers or names.
    pub nodes: Vec<String>,

    /// Every node tagged with one of these roles.
    #[arg(long, value_delimiter = ',')]
    pub roles: Vec<String>,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Parses `KEY=VALUE`; the value is read as YAML so numbers, booleans and
/// lists keep their type.
fn parse_parameter(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(String::from("parameter name is empty"));
    }

    let value = serde_yaml::from_str::<Value>(value)
        .ok()
        .filter(|v| !v.is_null() || value.trim() == "null")
        .unwrap_or_else(|| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_parameter_keeps_types() {
        assert_eq!(
            parse_parameter("ControllerCount=3").unwrap(),
            (String::from("ControllerCount"), json!(3))
        );
        assert_eq!(
            parse_parameter("Releases=[ocata, pike]").unwrap().1,
            json!(["ocata", "pike"])
        );
        assert_eq!(parse_parameter("Empty=").unwrap().1, json!(""));
        assert!(parse_parameter("novalue").is_err());
    }

    #[test]
    fn test_run_scope_flags() {
        let cli = Cli::try_parse_from(["overcloud", "upgrade", "run", "--roles", "Compute,Controller"])
            .unwrap();
        let Commands::Upgrade {
            stage: LifecycleStage::Run { roles, nodes },
        } = cli.command
        else {
            panic!("unexpected command");
        };
        assert_eq!(
            LifecycleStage::scope(&roles, &nodes),
            RunScope::Roles(vec![String::from("Compute"), String::from("Controller")])
        );

        assert!(
            Cli::try_parse_from(["overcloud", "update", "run", "--roles", "A", "--nodes", "n1"])
                .is_err()
        );
    }

    #[test]
    fn test_ffwd_confirmation_flag() {
        let cli = Cli::try_parse_from(["overcloud", "ffwd-upgrade", "run", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::FfwdUpgrade { yes: true, .. }));
    }
}
