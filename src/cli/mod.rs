//! CLI module for the overcloud deployment orchestrator.
//!
//! This module provides the command-line interface for staging plans,
//! deploying, updating and upgrading overclouds, and managing nodes.

mod commands;
mod output;

pub use commands::{
    Cli, Commands, LifecycleStage, NodeCommands, NodeTargets, OutputFormat, ParameterArgs,
    PlanCommands,
};
pub use output::OutputFormatter;
