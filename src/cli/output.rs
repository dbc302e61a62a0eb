//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DeployConfig, ValidationResult};
use crate::nodes::{Node, NodeOutcome, NodeResult};
use crate::orchestrator::{DeploymentRun, PhaseOutcome, ProgressEvent, RunOutcome};
use crate::plan::{PlanExport, PlanSummary};
use crate::stack::{ResourceFailure, StackRecord};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Phase row for table display.
#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Batch")]
    batch: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Node outcome row for table display.
#[derive(Tabled)]
struct NodeResultRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Node row for table display.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Templates")]
    templates: usize,
    #[tabled(rename = "Environments")]
    environments: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true if progress lines should be printed.
    #[must_use]
    pub fn shows_progress(&self) -> bool {
        self.format == OutputFormat::Text
    }

    /// Formats a finished run.
    #[must_use]
    pub fn format_run(&self, run: &DeploymentRun) -> String {
        match self.format {
            OutputFormat::Json => to_json(run),
            OutputFormat::Text => Self::format_run_text(run),
        }
    }

    fn format_run_text(run: &DeploymentRun) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "\n{} {} on stack {} (plan {})",
            "Run".bold(),
            run.operation.bold(),
            run.stack,
            run.plan
        );
        let _ = writeln!(
            output,
            "   Run id: {}{}\n",
            run.run_id,
            run.config_hash
                .as_deref()
                .map(|h| format!("  config {h}"))
                .unwrap_or_default()
        );

        if !run.phases.is_empty() {
            let rows: Vec<PhaseRow> = run
                .phases
                .iter()
                .enumerate()
                .map(|(i, p)| PhaseRow {
                    index: i + 1,
                    phase: p.name.clone(),
                    batch: p.batch.clone().unwrap_or_default(),
                    outcome: Self::format_phase_outcome(p.outcome),
                    duration: format_duration(p.duration_ms),
                    detail: truncate(p.detail.as_deref().unwrap_or(""), 60),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for phase in run.phases.iter().filter(|p| !p.nodes.is_empty()) {
            let _ = writeln!(
                output,
                "\nNodes of {}{}:",
                phase.name,
                phase
                    .batch
                    .as_deref()
                    .map(|b| format!(" [{b}]"))
                    .unwrap_or_default()
            );
            output.push_str(&Self::node_results_table(&phase.nodes));
            output.push('\n');
        }

        match &run.outcome {
            RunOutcome::Success => {
                let _ = writeln!(output, "\n{} {} succeeded", "✓".green(), run.operation);
            }
            RunOutcome::Failed {
                phase,
                batch,
                kind,
                detail,
                resource_failures,
            } => {
                let _ = writeln!(
                    output,
                    "\n{} {} failed in {phase}{} ({kind})",
                    "✗".red(),
                    run.operation,
                    batch.as_deref().map(|b| format!(" [{b}]")).unwrap_or_default()
                );
                let _ = writeln!(output, "   {detail}");
                output.push_str(&Self::format_failures(resource_failures));
            }
            RunOutcome::Aborted { phase, detail } => {
                let _ = writeln!(
                    output,
                    "\n{} {} stopped during {phase}: remote status unknown",
                    "!".yellow(),
                    run.operation
                );
                let _ = writeln!(output, "   {detail}");
            }
        }

        output
    }

    fn node_results_table(results: &[NodeResult]) -> String {
        let rows: Vec<NodeResultRow> = results
            .iter()
            .map(|r| {
                let (outcome, reason) = match &r.outcome {
                    NodeOutcome::Succeeded => ("succeeded".green().to_string(), String::new()),
                    NodeOutcome::Skipped { reason } => {
                        ("skipped".dimmed().to_string(), reason.clone())
                    }
                    NodeOutcome::Failed { reason, .. } => {
                        ("failed".red().to_string(), truncate(reason, 60))
                    }
                };
                NodeResultRow {
                    node: r.node.clone(),
                    outcome,
                    reason,
                }
            })
            .collect();
        Table::new(rows).to_string()
    }

    fn format_failures(failures: &[ResourceFailure]) -> String {
        let mut output = String::new();
        if failures.is_empty() {
            return output;
        }
        output.push_str("\n   Failed resources (oldest first):\n");
        for failure in failures {
            let _ = writeln!(output, "   - {failure}");
        }
        output
    }

    /// Formats a progress event as a single line, if it is worth showing.
    #[must_use]
    pub fn format_progress(event: &ProgressEvent) -> Option<String> {
        let line = match event {
            ProgressEvent::PhaseStarted { phase, batch } => format!(
                "{} {phase}{}",
                "→".cyan(),
                batch.as_deref().map(|b| format!(" [{b}]")).unwrap_or_default()
            ),
            ProgressEvent::PhaseFinished { .. } => return None,
            ProgressEvent::StackStatus { stack, status } => {
                format!("  stack {stack}: {status}")
            }
            ProgressEvent::WorkflowMessage {
                workflow,
                node,
                payload,
            } => {
                let text = payload
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| payload.to_string(), str::to_string);
                format!(
                    "  {}{workflow}: {}",
                    node.as_deref().map(|n| format!("{n} ")).unwrap_or_default(),
                    truncate(&text, 100)
                )
            }
            ProgressEvent::NodeOutcome { node, outcome } => match outcome {
                NodeOutcome::Succeeded => format!("  {} {node}", "✓".green()),
                NodeOutcome::Skipped { reason } => format!("  - {node} ({reason})"),
                NodeOutcome::Failed { reason, .. } => format!("  {} {node}: {reason}", "✗".red()),
            },
        };
        Some(line)
    }

    /// Formats configuration validation results.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &DeployConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        if self.format == OutputFormat::Json {
            let errors: Vec<_> = result
                .errors
                .iter()
                .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
                .collect();
            return to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": errors,
                "warnings": result.warnings,
            }));
        }

        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Configuration is valid", "✓".green());
        } else {
            let _ = writeln!(
                output,
                "{} Configuration has {} error(s):",
                "✗".red(),
                result.error_count()
            );
            for error in &result.errors {
                let _ = writeln!(output, "   - {}: {}", error.field.yellow(), error.message);
            }
        }

        if show_warnings && !result.warnings.is_empty() {
            output.push_str("\nWarnings:\n");
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        let _ = writeln!(output, "\nConfiguration summary:");
        let _ = writeln!(output, "   Stack: {}", config.stack_name());
        let _ = writeln!(output, "   Plan: {}", config.plan_name());
        let _ = writeln!(output, "   Roles: {}", config.role_names().join(", "));
        let _ = writeln!(
            output,
            "   Environments: {}",
            config.plan.environments.len()
        );
        output
    }

    /// Formats stored plans.
    #[must_use]
    pub fn format_plans(&self, plans: &[PlanSummary]) -> String {
        if self.format == OutputFormat::Json {
            return to_json(plans);
        }
        if plans.is_empty() {
            return String::from("No plans stored.\n");
        }

        let rows: Vec<PlanRow> = plans
            .iter()
            .map(|p| PlanRow {
                name: p.name.clone(),
                templates: p.templates,
                environments: truncate(&p.environments.join(", "), 50),
                updated: p.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        format!("{}\n", Table::new(rows))
    }

    /// Formats a plan summary after a change.
    #[must_use]
    pub fn format_plan(&self, plan: &PlanSummary) -> String {
        self.format_plans(std::slice::from_ref(plan))
    }

    /// Formats a plan export. The export itself is always JSON.
    #[must_use]
    pub fn format_export(export: &PlanExport) -> String {
        to_json(export)
    }

    /// Formats registered nodes.
    #[must_use]
    pub fn format_nodes(&self, nodes: &[Node]) -> String {
        if self.format == OutputFormat::Json {
            return to_json(nodes);
        }
        if nodes.is_empty() {
            return String::from("No nodes registered.\n");
        }

        let rows: Vec<NodeRow> = nodes
            .iter()
            .map(|n| NodeRow {
                name: n.name.clone(),
                role: n.role.clone().unwrap_or_else(|| String::from("-")),
                state: n.state.to_string(),
                id: truncate(&n.id, 12),
            })
            .collect();
        format!("{}\n", Table::new(rows))
    }

    /// Formats the stack status.
    #[must_use]
    pub fn format_stack(
        &self,
        stack: &str,
        record: Option<&StackRecord>,
        failures: &[ResourceFailure],
    ) -> String {
        if self.format == OutputFormat::Json {
            return to_json(&serde_json::json!({
                "stack": stack,
                "record": record,
                "failures": failures,
            }));
        }

        let Some(record) = record else {
            return format!("Stack {stack} does not exist.\n");
        };

        let status = if record.status.is_failed() {
            record.status.to_string().red().to_string()
        } else if record.status.is_in_progress() {
            record.status.to_string().yellow().to_string()
        } else {
            record.status.to_string().green().to_string()
        };

        let mut output = format!("\nStack {}: {status}\n", record.name.bold());
        if let Some(reason) = &record.status_reason {
            let _ = writeln!(output, "   {reason}");
        }
        if let Some(updated) = record.updated_time {
            let _ = writeln!(output, "   Updated: {}", updated.format("%Y-%m-%d %H:%M:%S"));
        }
        output.push_str(&Self::format_failures(failures));
        output
    }

    fn format_phase_outcome(outcome: PhaseOutcome) -> String {
        match outcome {
            PhaseOutcome::Success => "success".green().to_string(),
            PhaseOutcome::Failed => "failed".red().to_string(),
            PhaseOutcome::Aborted => "aborted".yellow().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

/// Truncates a string to `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
