//! Binary entry point for the jupyfly CLI.

use std::io::{self, BufRead, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use jupyfly::{
    BatchDriver, BatchError, BatchReport, CancelFlag, DeleteOutcome, FlyConfig, FlyControlPlane,
    FsRecordStore, LifecycleError, ProvisionOutcome, ResourceTier, StartOutcome, StopOutcome,
    WorkspaceController, WorkspaceSummary, any_failed, load_batch_file,
};

mod cli;

use cli::{BatchCommand, Cli, DeleteCommand, ResourcesArg};

const LOG_ENV: &str = "JUPYFLY_LOG";

type Controller = WorkspaceController<FlyControlPlane, FsRecordStore>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let controller = build_controller()?;
    let mut stdout = io::stdout();

    match cli {
        Cli::Provision(command) => {
            let outcome = controller
                .provision(&command.student_id, tier_for(command.resources))
                .await?;
            render_provision(&mut stdout, &outcome)
        }
        Cli::Stop(command) => {
            let outcome = controller.stop(&command.student_id).await?;
            render_stop(&mut stdout, &command.student_id, &outcome)
        }
        Cli::Start(command) => {
            let outcome = controller.start(&command.student_id).await?;
            render_start(&mut stdout, &command.student_id, &outcome)
        }
        Cli::Delete(command) => run_delete(&controller, &command, &mut stdout).await,
        Cli::List => {
            let summaries = controller.list().await?;
            render_list(&mut stdout, &summaries)
        }
        Cli::Batch(command) => run_batch(&controller, &command, &mut stdout).await,
    }
}

fn build_controller() -> Result<Controller, CliError> {
    let config =
        FlyConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let control_plane =
        FlyControlPlane::new(&config).map_err(|err| CliError::Config(err.to_string()))?;
    let records = FsRecordStore::new(Utf8PathBuf::from(config.records_dir.trim()));
    Ok(WorkspaceController::new(config, control_plane, records))
}

const fn tier_for(resources: ResourcesArg) -> ResourceTier {
    match resources {
        ResourcesArg::Standard => ResourceTier::Standard,
        ResourcesArg::High => ResourceTier::High,
    }
}

async fn run_delete(
    controller: &Controller,
    command: &DeleteCommand,
    out: &mut impl Write,
) -> Result<i32, CliError> {
    let confirmed = command.yes
        || confirm_delete(
            &command.student_id,
            &mut io::stdin().lock(),
            &mut io::stderr(),
        )?;
    let outcome = controller.delete(&command.student_id, confirmed).await?;
    render_delete(out, &command.student_id, outcome)
}

async fn run_batch(
    controller: &Controller,
    command: &BatchCommand,
    out: &mut impl Write,
) -> Result<i32, CliError> {
    let lines = load_batch_file(&Utf8PathBuf::from(command.file.as_str()))?;
    let concurrency = command
        .concurrency
        .unwrap_or(controller.config().batch_concurrency);

    let cancel = CancelFlag::new();
    let watcher = {
        let flag = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.cancel();
            }
        })
    };
    let report = BatchDriver::new(controller, concurrency)
        .with_cancel(cancel)
        .run(lines)
        .await;
    watcher.abort();

    render_batch(out, &report)
}

/// Asks the operator to retype the student id. Anything else cancels.
fn confirm_delete(
    student_id: &str,
    input: &mut impl BufRead,
    prompt: &mut impl Write,
) -> io::Result<bool> {
    write!(
        prompt,
        "This permanently deletes the workspace and its notebooks.\n\
         Type the student id to confirm ({student_id}): "
    )?;
    prompt.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(!student_id.trim().is_empty() && answer.trim() == student_id.trim())
}

fn render_provision(out: &mut impl Write, outcome: &ProvisionOutcome) -> Result<i32, CliError> {
    match outcome {
        ProvisionOutcome::Created(record) => {
            writeln!(out, "Workspace for {} is ready.", record.student_id)?;
            writeln!(out, "URL: {}", record.url)?;
        }
        ProvisionOutcome::AlreadyExists {
            app_name,
            hostname,
            access_url,
        } => {
            writeln!(out, "Workspace {app_name} already exists.")?;
            match access_url {
                Some(url) => writeln!(out, "URL: {url}")?,
                None => writeln!(
                    out,
                    "URL: https://{hostname}/lab (no local access record; token unknown)"
                )?,
            }
        }
        ProvisionOutcome::Conflict { app_name, message } => {
            writeln!(out, "Workspace {app_name} was created concurrently: {message}")?;
        }
    }
    Ok(0)
}

fn render_stop(
    out: &mut impl Write,
    student_id: &str,
    outcome: &StopOutcome,
) -> Result<i32, CliError> {
    match outcome {
        StopOutcome::NothingToStop => {
            writeln!(out, "Nothing to stop for {student_id}.")?;
            Ok(0)
        }
        StopOutcome::Stopped(reports) => {
            for report in reports {
                writeln!(out, "{}: {}", report.machine_id, report.result)?;
            }
            Ok(i32::from(any_failed(reports)))
        }
    }
}

fn render_start(
    out: &mut impl Write,
    student_id: &str,
    outcome: &StartOutcome,
) -> Result<i32, CliError> {
    match outcome {
        StartOutcome::NoInstance => {
            writeln!(out, "No instance found for {student_id}.")?;
            Ok(0)
        }
        StartOutcome::Started(reports) => {
            for report in reports {
                writeln!(out, "{}: {}", report.machine_id, report.result)?;
            }
            Ok(i32::from(any_failed(reports)))
        }
        StartOutcome::Recreated {
            machine_id,
            access_url,
            token_reused,
        } => {
            writeln!(out, "Recreated machine {machine_id} for {student_id}.")?;
            writeln!(out, "URL: {access_url}")?;
            if !token_reused {
                writeln!(out, "A new access token was issued; earlier URLs no longer work.")?;
            }
            Ok(0)
        }
    }
}

fn render_delete(
    out: &mut impl Write,
    student_id: &str,
    outcome: DeleteOutcome,
) -> Result<i32, CliError> {
    match outcome {
        DeleteOutcome::Cancelled => writeln!(out, "Deletion of {student_id} cancelled.")?,
        DeleteOutcome::Deleted { record_removed } => {
            writeln!(out, "Deleted workspace for {student_id}.")?;
            if record_removed {
                writeln!(out, "Removed local access record.")?;
            }
        }
        DeleteOutcome::NotFound { .. } => {
            writeln!(out, "No workspace found for {student_id}.")?;
        }
    }
    Ok(0)
}

fn render_list(out: &mut impl Write, summaries: &[WorkspaceSummary]) -> Result<i32, CliError> {
    if summaries.is_empty() {
        writeln!(out, "No workspaces found.")?;
        return Ok(0);
    }
    let width = summaries
        .iter()
        .map(|summary| summary.student_id.len())
        .max()
        .unwrap_or_default()
        .max("STUDENT".len());
    writeln!(out, "{:<width$}  {:<24}  STATUS", "STUDENT", "APP")?;
    for summary in summaries {
        writeln!(
            out,
            "{:<width$}  {:<24}  {}",
            summary.student_id, summary.app_name, summary.status
        )?;
    }
    Ok(0)
}

fn render_batch(out: &mut impl Write, report: &BatchReport) -> Result<i32, CliError> {
    for entry in &report.entries {
        let label = if entry.student_id.is_empty() {
            "<missing id>"
        } else {
            entry.student_id.as_str()
        };
        writeln!(out, "line {}: {label}: {}", entry.line, entry.result)?;
    }
    writeln!(out, "{}", report.counts())?;
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}
