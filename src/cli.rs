// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::TerminationStrategy;

/// Command-line arguments for `taskgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskgraph",
    version,
    about = "Run a graph of dependent commands described in a TOML manifest.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the manifest (TOML).
    #[arg(long, value_name = "PATH", default_value = "Taskgraph.toml")]
    pub config: String,

    /// What to do once a task fails; overrides `[config].termination`.
    #[arg(long, value_enum, value_name = "STRATEGY")]
    pub termination: Option<TerminationArg>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse, validate and print the traversal order without running anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Termination strategy as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum TerminationArg {
    /// Cancel only what depends on the failed task.
    Lca,
    /// Start nothing new; let running tasks finish.
    InProgress,
}

impl From<TerminationArg> for TerminationStrategy {
    fn from(arg: TerminationArg) -> Self {
        match arg {
            TerminationArg::Lca => TerminationStrategy::TerminateOnHittingLcaTask,
            TerminationArg::InProgress => {
                TerminationStrategy::TerminateOnInProgressTasksCompletion
            }
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
