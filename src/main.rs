//! Overcloud CLI entrypoint.
//!
//! This is the main entrypoint for the overcloud command-line tool.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use overcloud_deploy::cli::{
    Cli, Commands, LifecycleStage, NodeCommands, NodeTargets, OutputFormatter, ParameterArgs,
    PlanCommands,
};
use overcloud_deploy::config::{ConfigParser, ConfigValidator, DeployConfig, find_config_file};
use overcloud_deploy::error::{ConfigError, FailureKind, Result};
use overcloud_deploy::nodes::NodeRegistration;
use overcloud_deploy::orchestrator::{DeploymentRun, Lifecycle, Orchestrator, Services, plan_store};
use overcloud_deploy::plan::{Parameters, PlanSources, PlanSummary, load_environment};
use overcloud_deploy::stack::StackClient;

use clap::Parser;
use colored::Colorize;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(runtime.block_on(run(cli)))
}

/// Initializes the logging system. `RUST_LOG` wins unless `--verbose` is set.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns the process exit status.
async fn run(cli: Cli) -> u8 {
    let formatter = OutputFormatter::new(cli.output);

    match execute(cli, &formatter).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "Error:".red());
            e.kind().exit_code()
        }
    }
}

async fn execute(cli: Cli, formatter: &OutputFormatter) -> Result<u8> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, formatter),
        Commands::Plan { command } => cmd_plan(config_path, command, formatter).await,
        Commands::Deploy => cmd_deploy(config_path, formatter).await,
        Commands::Update { stage } => {
            cmd_lifecycle(config_path, Lifecycle::Update, stage, formatter).await
        }
        Commands::Upgrade { stage } => {
            cmd_lifecycle(config_path, Lifecycle::Upgrade, stage, formatter).await
        }
        Commands::FfwdUpgrade { stage, yes } => {
            if !yes
                && !confirm("Fast-forward upgrades skip releases and cannot be undone. Continue?")?
            {
                eprintln!("Fast-forward upgrade cancelled.");
                return Ok(0);
            }
            cmd_lifecycle(config_path, Lifecycle::FfwdUpgrade, stage, formatter).await
        }
        Commands::Delete { yes } => cmd_delete(config_path, yes, formatter).await,
        Commands::Status => cmd_status(config_path, formatter).await,
        Commands::Node { command } => cmd_node(config_path, command, formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = read_config(config_path)?;
    let result = ConfigValidator::new().check(&config);

    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    Ok(if result.is_valid() {
        0
    } else {
        FailureKind::Validation.exit_code()
    })
}

/// Plan management commands.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    command: PlanCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path)?;
    let plans = plan_store(&config).await?;
    let name = config.plan_name();

    match command {
        PlanCommands::Create => {
            let sources = load_sources(&config).await?;
            plans
                .create_plan(name, sources.templates, config.plan.parameters.clone())
                .await?;
            for environment in sources.environments {
                plans.merge_environment(name, environment).await?;
            }
            plans
                .generate_passwords(name, &config.plan.generated_passwords)
                .await?;

            let plan = plans.get_plan(name).await?;
            println!("{}", formatter.format_plan(&PlanSummary::from(&plan)));
        }
        PlanCommands::Update { parameters } => {
            let delta = parameter_delta(&parameters).await?;
            if delta.is_empty() {
                return Err(ConfigError::validation("No parameter changes given", "--set").into());
            }
            let plan = plans.update_parameters(name, delta).await?;
            println!("{}", formatter.format_plan(&PlanSummary::from(&plan)));
        }
        PlanCommands::Export { out, validate } => {
            let export = if validate {
                plans.validate_plan(name).await?
            } else {
                plans.export_plan(name).await?
            };
            let body = OutputFormatter::format_export(&export);
            match out {
                Some(path) => {
                    tokio::fs::write(&path, body).await?;
                    info!("Wrote export of plan {name} to {}", path.display());
                }
                None => println!("{body}"),
            }
        }
        PlanCommands::Delete { yes } => {
            if !yes && !confirm(&format!("Delete plan {name}?"))? {
                eprintln!("Plan deletion cancelled.");
                return Ok(0);
            }
            if plans.delete_plan(name).await? {
                eprintln!("Plan {name} deleted.");
            } else {
                eprintln!("Plan {name} does not exist.");
            }
        }
        PlanCommands::List => {
            let mut summaries = Vec::new();
            for plan in plans.list_plans().await? {
                summaries.push(PlanSummary::from(&plans.get_plan(&plan).await?));
            }
            println!("{}", formatter.format_plans(&summaries));
        }
    }

    Ok(0)
}

/// Deploy the overcloud.
async fn cmd_deploy(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<u8> {
    let config = load_config(config_path)?;
    let sources = load_sources(&config).await?;

    run_operation(config, formatter, move |o| async move {
        Ok(o.deploy(&sources).await)
    })
    .await
}

/// Update, upgrade and fast-forward upgrade stages.
async fn cmd_lifecycle(
    config_path: Option<&PathBuf>,
    lifecycle: Lifecycle,
    stage: LifecycleStage,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path)?;

    match stage {
        LifecycleStage::Prepare { parameters } => {
            let sources = load_sources(&config).await?;
            let delta = parameter_delta(&parameters).await?;
            run_operation(config, formatter, move |o| async move {
                Ok(o.prepare(lifecycle, &sources, &delta).await)
            })
            .await
        }
        LifecycleStage::Run { roles, nodes } => {
            let scope = LifecycleStage::scope(&roles, &nodes);
            run_operation(config, formatter, move |o| async move {
                Ok(o.run(lifecycle, &scope).await)
            })
            .await
        }
        LifecycleStage::Converge => {
            run_operation(config, formatter, move |o| async move {
                Ok(o.converge(lifecycle).await)
            })
            .await
        }
    }
}

/// Delete the stack.
async fn cmd_delete(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path)?;

    if !auto_approve {
        let prompt = format!(
            "Delete stack {}? Nodes are unprovisioned; the plan is kept.",
            config.stack_name()
        );
        if !confirm(&prompt)? {
            eprintln!("Deletion cancelled.");
            return Ok(0);
        }
    }

    run_operation(config, formatter, |o| async move { Ok(o.delete().await) }).await
}

/// Show the stack status.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<u8> {
    let config = load_config(config_path)?;
    let services = Services::connect(&config, auth_token()).await?;
    let stacks = StackClient::new(services.orchestration);
    let name = config.stack_name();

    let record = stacks.status(name).await?;
    let failures = match &record {
        Some(r) if r.status.is_failed() => stacks.get_failures(name).await?,
        _ => Vec::new(),
    };

    println!("{}", formatter.format_stack(name, record.as_ref(), &failures));
    Ok(0)
}

/// Node management commands.
async fn cmd_node(
    config_path: Option<&PathBuf>,
    command: NodeCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let config = load_config(config_path)?;

    match command {
        NodeCommands::List => {
            let services = Services::connect(&config, auth_token()).await?;
            let nodes = services.provisioning.list_nodes().await?;
            println!("{}", formatter.format_nodes(&nodes));
            Ok(0)
        }
        NodeCommands::Import { file } => {
            let registrations = read_registrations(&file).await?;
            run_operation(config, formatter, move |o| async move {
                Ok(o.import_nodes(registrations).await)
            })
            .await
        }
        NodeCommands::Introspect { targets } => {
            run_operation(config, formatter, move |o| async move {
                let ids = node_ids(&o, targets).await?;
                Ok(o.introspect_nodes(&ids).await)
            })
            .await
        }
        NodeCommands::Provide { targets } => {
            run_operation(config, formatter, move |o| async move {
                let ids = node_ids(&o, targets).await?;
                Ok(o.provide_nodes(&ids).await)
            })
            .await
        }
        NodeCommands::Clean { targets } => {
            run_operation(config, formatter, move |o| async move {
                let ids = node_ids(&o, targets).await?;
                Ok(o.clean_nodes(&ids).await)
            })
            .await
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Builds an orchestrator, runs `operation` on it and prints the run.
///
/// Progress is streamed to stderr while the operation runs. Ctrl-C stops
/// watching; remote operations keep running.
async fn run_operation<F, Fut>(
    config: DeployConfig,
    formatter: &OutputFormatter,
    operation: F,
) -> Result<u8>
where
    F: FnOnce(Orchestrator) -> Fut,
    Fut: Future<Output = Result<DeploymentRun>>,
{
    let services = Services::connect(&config, auth_token()).await?;

    let cancel = CancellationToken::new();
    watch_interrupt(cancel.clone());

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let show_progress = formatter.shows_progress();
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if show_progress && let Some(line) = OutputFormatter::format_progress(&event) {
                eprintln!("{line}");
            }
        }
    });

    // The orchestrator owns the sender; the printer ends once it is dropped.
    let run = operation(Orchestrator::new(config, services, cancel).with_progress(sender)).await;
    let _ = printer.await;
    let run = run?;

    println!("{}", formatter.format_run(&run));
    Ok(run.exit_code())
}

fn watch_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: no longer watching, remote operations keep running");
            cancel.cancel();
        }
    });
}

/// Resolves node targets to identifiers.
async fn node_ids(orchestrator: &Orchestrator, targets: NodeTargets) -> Result<Vec<String>> {
    if !targets.nodes.is_empty() {
        return Ok(targets.nodes);
    }

    let nodes = orchestrator.nodes().nodes_for_roles(&targets.roles).await?;
    if nodes.is_empty() {
        return Err(ConfigError::validation(
            format!("No nodes are tagged with {}", targets.roles.join(", ")),
            "--roles",
        )
        .into());
    }
    Ok(nodes.into_iter().map(|n| n.id).collect())
}

/// Node registration file: a list, or a mapping with a `nodes` list.
#[derive(Deserialize)]
#[serde(untagged)]
enum RegistrationFile {
    List(Vec<NodeRegistration>),
    Wrapped { nodes: Vec<NodeRegistration> },
}

async fn read_registrations(path: &Path) -> Result<Vec<NodeRegistration>> {
    let content = tokio::fs::read_to_string(path).await?;
    let parsed: RegistrationFile = serde_yaml::from_str(&content).map_err(|e| {
        ConfigError::ParseError {
            message: format!("Invalid node registration file: {e}"),
            location: Some(path.display().to_string()),
        }
    })?;

    Ok(match parsed {
        RegistrationFile::List(nodes) | RegistrationFile::Wrapped { nodes } => nodes,
    })
}

/// Collects parameter changes from `--parameters-file` then `--set`.
async fn parameter_delta(args: &ParameterArgs) -> Result<Parameters> {
    let mut delta = Parameters::new();
    if let Some(path) = &args.file {
        delta.extend(load_environment(path).await?.parameters);
    }
    delta.extend(args.set.iter().cloned());
    Ok(delta)
}

async fn load_sources(config: &DeployConfig) -> Result<PlanSources> {
    PlanSources::load(&config.plan.templates_dir, &config.plan.environments).await
}

fn auth_token() -> Option<String> {
    let token = ConfigParser::auth_token();
    if token.is_none() {
        warn!("OVERCLOUD_AUTH_TOKEN is not set; requests are sent without credentials");
    }
    token
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Reads the configuration and applies environment overrides.
fn read_config(config_path: Option<&PathBuf>) -> Result<DeployConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new()
        .with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;
    parser.load_with_env(&config_file)
}

/// Reads and validates the configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<DeployConfig> {
    let config = read_config(config_path)?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}
