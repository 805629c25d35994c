//! Command-line interface definitions for the `jupyfly` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `jupyfly` binary.
#[derive(Debug, Parser)]
#[command(
    name = "jupyfly",
    about = "Provision and manage per-student Jupyter Lab workspaces on Fly.io",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create the application, volume, and machine for a student.
    #[command(name = "provision", about = "Create a workspace for a student")]
    Provision(ProvisionCommand),
    /// Stop every running machine of a student's workspace.
    #[command(name = "stop", about = "Stop a student's workspace")]
    Stop(StudentCommand),
    /// Start a stopped workspace, recreating its machine if needed.
    #[command(name = "start", about = "Start a student's workspace")]
    Start(StudentCommand),
    /// Delete a student's workspace and its access record.
    #[command(name = "delete", about = "Delete a student's workspace")]
    Delete(DeleteCommand),
    /// List every workspace with the state of its machine.
    #[command(name = "list", about = "List workspaces")]
    List,
    /// Provision every student listed in a batch file.
    #[command(name = "batch", about = "Provision workspaces from a batch file")]
    Batch(BatchCommand),
}

/// Resource tiers accepted by `--resources`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum ResourcesArg {
    /// One shared CPU, 512 MB of memory.
    #[default]
    Standard,
    /// Two shared CPUs, 2 GB of memory.
    High,
}

/// Arguments for `jupyfly provision`.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Student identifier (lowercase letters, digits, and '-').
    pub(crate) student_id: String,
    /// Compute and memory allocated to the workspace machine.
    #[arg(long, value_enum, default_value_t = ResourcesArg::Standard)]
    pub(crate) resources: ResourcesArg,
}

/// Arguments for subcommands addressing a single student.
#[derive(Debug, Parser)]
pub(crate) struct StudentCommand {
    /// Student identifier.
    pub(crate) student_id: String,
}

/// Arguments for `jupyfly delete`.
#[derive(Debug, Parser)]
pub(crate) struct DeleteCommand {
    /// Student identifier.
    pub(crate) student_id: String,
    /// Skip the interactive confirmation prompt.
    #[arg(long, short = 'y')]
    pub(crate) yes: bool,
}

/// Arguments for `jupyfly batch`.
#[derive(Debug, Parser)]
pub(crate) struct BatchCommand {
    /// File listing one `student_id[,resource_tier]` per line.
    #[arg(value_name = "FILE")]
    pub(crate) file: String,
    /// Maximum number of students provisioned at once.
    ///
    /// Defaults to the configured `batch_concurrency`.
    #[arg(long, value_name = "N")]
    pub(crate) concurrency: Option<usize>,
}
