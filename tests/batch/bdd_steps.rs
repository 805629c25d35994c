//! BDD step definitions for batch provisioning.

use std::time::Duration;

use jupyfly::test_support::{Operation, sample_config};
use jupyfly::{BatchDriver, BatchReport, EntryResult, WorkspaceController, parse_batch};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::BatchContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn report(batch_context: &BatchContext) -> Result<BatchReport, StepError> {
    batch_context
        .report
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("batch has not run")))
}

fn result_label(result: &EntryResult) -> &'static str {
    match result {
        EntryResult::Provisioned { .. } => "provisioned",
        EntryResult::AlreadyExists { .. } => "already exists",
        EntryResult::Conflict { .. } => "conflict",
        EntryResult::Failed { .. } => "failed",
        EntryResult::Malformed { .. } => "malformed",
        EntryResult::Skipped => "skipped",
    }
}

#[given("the batch line \"{line}\"")]
fn batch_line(batch_context: &BatchContext, line: String) {
    batch_context.push_line(&line);
}

#[given("the application for \"{student_id}\" already exists")]
fn application_exists(batch_context: &BatchContext, student_id: String) {
    let app_name = format!("{}{student_id}", sample_config().app_prefix);
    batch_context.plane.insert_app(&app_name);
}

#[given("the batch was cancelled")]
fn batch_cancelled(batch_context: &BatchContext) {
    batch_context.cancel.cancel();
}

#[when("I run the batch with concurrency {concurrency}")]
fn run_batch(batch_context: &BatchContext, concurrency: usize) -> Result<(), StepError> {
    let runtime =
        Runtime::new().map_err(|err| StepError::Assertion(format!("tokio runtime: {err}")))?;
    let controller = WorkspaceController::new(
        sample_config(),
        batch_context.plane.clone(),
        batch_context.records.clone(),
    )
    .with_settle_delay(Duration::ZERO);
    let lines = parse_batch(&batch_context.contents.borrow());
    let driver =
        BatchDriver::new(&controller, concurrency).with_cancel(batch_context.cancel.clone());

    let report = runtime.block_on(driver.run(lines));
    batch_context.report.replace(Some(report));
    Ok(())
}

#[then("the batch reports \"{student_id}\" as \"{label}\"")]
fn entry_reported(
    batch_context: &BatchContext,
    student_id: String,
    label: String,
) -> Result<(), StepError> {
    let report = report(batch_context)?;
    let entry = report
        .entry(&student_id)
        .ok_or_else(|| StepError::Assertion(format!("{student_id} missing from report")))?;
    let observed = result_label(&entry.result);
    if observed == label {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {student_id} to be {label}, got {}",
            entry.result
        )))
    }
}

#[then("the batch reports line {line} as \"{label}\"")]
fn line_reported(
    batch_context: &BatchContext,
    line: usize,
    label: String,
) -> Result<(), StepError> {
    let report = report(batch_context)?;
    let entry = report
        .entries
        .iter()
        .find(|entry| entry.line == line)
        .ok_or_else(|| StepError::Assertion(format!("line {line} missing from report")))?;
    let observed = result_label(&entry.result);
    if observed == label {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected line {line} to be {label}, got {}",
            entry.result
        )))
    }
}

#[then("the batch summary is \"{summary}\"")]
fn batch_summary(batch_context: &BatchContext, summary: String) -> Result<(), StepError> {
    let observed = report(batch_context)?.counts().to_string();
    if observed == summary {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected summary {summary:?}, got {observed:?}"
        )))
    }
}

#[then("no application was created")]
fn no_application_created(batch_context: &BatchContext) -> Result<(), StepError> {
    let created = batch_context.plane.count(Operation::CreateApp);
    if created == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no application creation, got {created}"
        )))
    }
}
