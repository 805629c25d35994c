//! BDD step definitions for the workspace lifecycle.

use std::str::FromStr;

use jupyfly::test_support::MemoryControlPlane;
use jupyfly::{
    AccessRecord, DeleteOutcome, LifecycleError, ProvisionOutcome, RecordStore, ResourceTier,
    StartOutcome, StopOutcome, StudentId,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{LifecycleContext, LifecycleResult, parse_operation};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Assertion(format!("tokio runtime: {err}")))
}

fn student(raw: &str) -> Result<StudentId, StepError> {
    StudentId::parse(raw).map_err(|err| StepError::Assertion(format!("student id: {err}")))
}

fn stored_record(
    lifecycle_context: &LifecycleContext,
    student_id: &str,
) -> Result<Option<AccessRecord>, StepError> {
    lifecycle_context
        .records
        .load(&student(student_id)?)
        .map_err(|err| StepError::Assertion(format!("load record: {err}")))
}

fn record_result(
    lifecycle_context: &LifecycleContext,
    result: Result<LifecycleResult, LifecycleError>,
) {
    lifecycle_context
        .set_outcome(result.unwrap_or_else(|err| LifecycleResult::Failure(err.to_string())));
}

#[given("an empty control plane")]
fn empty_control_plane(lifecycle_context: &LifecycleContext) {
    assert!(lifecycle_context.plane.calls().is_empty());
}

#[given("the application for \"{student_id}\" exists")]
fn application_exists(lifecycle_context: &LifecycleContext, student_id: String) {
    let app_name = lifecycle_context.app_name(&student_id);
    lifecycle_context.plane.insert_app(&app_name);
}

#[given("\"{student_id}\" has machine \"{machine_id}\" in state \"{state}\"")]
fn has_machine(
    lifecycle_context: &LifecycleContext,
    student_id: String,
    machine_id: String,
    state: String,
) {
    let app_name = lifecycle_context.app_name(&student_id);
    lifecycle_context
        .plane
        .insert_machine(&app_name, &machine_id, &state);
}

#[given("\"{student_id}\" has volume \"{volume_id}\" named \"{volume_name}\"")]
fn has_volume(
    lifecycle_context: &LifecycleContext,
    student_id: String,
    volume_id: String,
    volume_name: String,
) {
    let app_name = lifecycle_context.app_name(&student_id);
    lifecycle_context
        .plane
        .insert_volume(&app_name, &volume_id, &volume_name);
}

#[given("\"{student_id}\" was provisioned earlier")]
fn provisioned_earlier(
    lifecycle_context: &LifecycleContext,
    student_id: String,
) -> Result<(), StepError> {
    // Provision against a separate control plane so the scenario's call log
    // starts empty while the record directory is shared.
    let controller = lifecycle_context.controller_for(MemoryControlPlane::new());
    let outcome = runtime()?
        .block_on(async { controller.provision(&student_id, ResourceTier::High).await })?;
    let ProvisionOutcome::Created(record) = outcome else {
        return Err(StepError::Assertion(format!(
            "expected a created workspace, got {outcome:?}"
        )));
    };
    lifecycle_context.provisioned.replace(Some(record));
    Ok(())
}

#[when("I provision \"{student_id}\" with the \"{tier}\" tier")]
fn provision(
    lifecycle_context: &LifecycleContext,
    student_id: String,
    tier: String,
) -> Result<(), StepError> {
    let resolved =
        ResourceTier::from_str(&tier).map_err(|err| StepError::Assertion(err.to_string()))?;
    let controller = lifecycle_context.controller();
    let result = runtime()?.block_on(async { controller.provision(&student_id, resolved).await });
    record_result(lifecycle_context, result.map(LifecycleResult::Provision));
    Ok(())
}

#[when("I stop \"{student_id}\"")]
fn stop(lifecycle_context: &LifecycleContext, student_id: String) -> Result<(), StepError> {
    let controller = lifecycle_context.controller();
    let result = runtime()?.block_on(async { controller.stop(&student_id).await });
    record_result(lifecycle_context, result.map(LifecycleResult::Stop));
    Ok(())
}

#[when("I start \"{student_id}\"")]
fn start(lifecycle_context: &LifecycleContext, student_id: String) -> Result<(), StepError> {
    let controller = lifecycle_context.controller();
    let result = runtime()?.block_on(async { controller.start(&student_id).await });
    record_result(lifecycle_context, result.map(LifecycleResult::Start));
    Ok(())
}

#[when("I delete \"{student_id}\" without confirmation")]
fn delete_unconfirmed(
    lifecycle_context: &LifecycleContext,
    student_id: String,
) -> Result<(), StepError> {
    let controller = lifecycle_context.controller();
    let result = runtime()?.block_on(async { controller.delete(&student_id, false).await });
    record_result(lifecycle_context, result.map(LifecycleResult::Delete));
    Ok(())
}

#[when("I delete \"{student_id}\" with confirmation")]
fn delete_confirmed(
    lifecycle_context: &LifecycleContext,
    student_id: String,
) -> Result<(), StepError> {
    let controller = lifecycle_context.controller();
    let result = runtime()?.block_on(async { controller.delete(&student_id, true).await });
    record_result(lifecycle_context, result.map(LifecycleResult::Delete));
    Ok(())
}

fn outcome(lifecycle_context: &LifecycleContext) -> Result<LifecycleResult, StepError> {
    lifecycle_context
        .outcome
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the provision creates a workspace")]
fn provision_created(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match outcome(lifecycle_context)? {
        LifecycleResult::Provision(ProvisionOutcome::Created(_)) => Ok(()),
        LifecycleResult::Failure(message) => Err(StepError::Assertion(format!(
            "provision failed: {message}"
        ))),
        other => Err(StepError::Assertion(format!(
            "expected a created workspace, got {other:?}"
        ))),
    }
}

#[then("the provision reports an existing workspace")]
fn provision_existing(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match outcome(lifecycle_context)? {
        LifecycleResult::Provision(ProvisionOutcome::AlreadyExists { access_url, .. }) => {
            if access_url.is_some() {
                Ok(())
            } else {
                Err(StepError::Assertion(String::from(
                    "existing workspace should report the stored URL",
                )))
            }
        }
        other => Err(StepError::Assertion(format!(
            "expected an existing workspace, got {other:?}"
        ))),
    }
}

#[then("the control plane saw \"{sequence}\" in order")]
fn saw_mutations_in_order(
    lifecycle_context: &LifecycleContext,
    sequence: String,
) -> Result<(), StepError> {
    let expected = sequence
        .split(',')
        .map(|name| {
            parse_operation(name.trim())
                .ok_or_else(|| StepError::Assertion(format!("unknown operation {name}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let observed = lifecycle_context
        .plane
        .operations()
        .into_iter()
        .filter(|operation| operation.is_mutation())
        .collect::<Vec<_>>();
    if observed == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected mutations {expected:?}, got {observed:?}"
        )))
    }
}

#[then("the control plane saw {count} \"{operation}\" calls")]
fn saw_operation_count(
    lifecycle_context: &LifecycleContext,
    count: usize,
    operation: String,
) -> Result<(), StepError> {
    let parsed = parse_operation(&operation)
        .ok_or_else(|| StepError::Assertion(format!("unknown operation {operation}")))?;
    let observed = lifecycle_context.plane.count(parsed);
    if observed == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} {operation} calls, got {observed}"
        )))
    }
}

#[then("the control plane saw no calls")]
fn saw_no_calls(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let calls = lifecycle_context.plane.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected calls: {calls:?}")))
    }
}

#[then("the access record for \"{student_id}\" has hostname \"{hostname}\"")]
fn record_hostname(
    lifecycle_context: &LifecycleContext,
    student_id: String,
    hostname: String,
) -> Result<(), StepError> {
    let record = stored_record(lifecycle_context, &student_id)?
        .ok_or_else(|| StepError::Assertion(format!("no record for {student_id}")))?;
    if record.hostname == hostname && record.url.starts_with(&format!("https://{hostname}/")) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected hostname {} (url {})",
            record.hostname, record.url
        )))
    }
}

#[then("the access record for \"{student_id}\" carries a URL-safe token")]
fn record_token(lifecycle_context: &LifecycleContext, student_id: String) -> Result<(), StepError> {
    let record = stored_record(lifecycle_context, &student_id)?
        .ok_or_else(|| StepError::Assertion(format!("no record for {student_id}")))?;
    let token = &record.access_token;
    let url_safe = token
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if token.len() >= 20 && url_safe && record.url.ends_with(token.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected token {token}")))
    }
}

#[then("machine \"{machine_id}\" reports \"{result}\"")]
fn machine_reports(
    lifecycle_context: &LifecycleContext,
    machine_id: String,
    result: String,
) -> Result<(), StepError> {
    let LifecycleResult::Stop(StopOutcome::Stopped(reports)) = outcome(lifecycle_context)? else {
        return Err(StepError::Assertion(String::from(
            "expected machine reports from stop",
        )));
    };
    let report = reports
        .iter()
        .find(|report| report.machine_id.as_str() == machine_id)
        .ok_or_else(|| StepError::Assertion(format!("no report for {machine_id}")))?;
    if report.result.to_string() == result {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "machine {machine_id} reported {}",
            report.result
        )))
    }
}

#[then("the workspace machine was recreated")]
fn machine_recreated(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match outcome(lifecycle_context)? {
        LifecycleResult::Start(StartOutcome::Recreated { token_reused, .. }) if token_reused => {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected a recreated machine reusing the token, got {other:?}"
        ))),
    }
}

#[then("the recreated machine carries the provisioned token")]
fn recreated_machine_token(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let provisioned = lifecycle_context
        .provisioned
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("nothing was provisioned")))?;
    let created = lifecycle_context.plane.created_machines();
    let [(_, machine)] = created.as_slice() else {
        return Err(StepError::Assertion(format!(
            "expected one machine creation, got {}",
            created.len()
        )));
    };
    if machine.access_token() == Some(provisioned.access_token.as_str())
        && machine.config.guest.cpus == provisioned.resource_tier.cpus()
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "machine token {:?} differs from provisioned token",
            machine.access_token()
        )))
    }
}

#[then("the stored record for \"{student_id}\" matches the provisioned record")]
fn stored_matches_provisioned(
    lifecycle_context: &LifecycleContext,
    student_id: String,
) -> Result<(), StepError> {
    let stored = stored_record(lifecycle_context, &student_id)?;
    let provisioned = lifecycle_context.provisioned.borrow().clone();
    if stored.is_some() && stored == provisioned {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "stored {stored:?} differs from provisioned {provisioned:?}"
        )))
    }
}

#[then("the delete is cancelled")]
fn delete_cancelled(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match outcome(lifecycle_context)? {
        LifecycleResult::Delete(DeleteOutcome::Cancelled) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a cancelled delete, got {other:?}"
        ))),
    }
}

#[then("the delete removed the workspace")]
fn delete_removed(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match outcome(lifecycle_context)? {
        LifecycleResult::Delete(DeleteOutcome::Deleted {
            record_removed: true,
        }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the workspace and record to be deleted, got {other:?}"
        ))),
    }
}

#[then("no access record remains for \"{student_id}\"")]
fn no_record(lifecycle_context: &LifecycleContext, student_id: String) -> Result<(), StepError> {
    match stored_record(lifecycle_context, &student_id)? {
        None => Ok(()),
        Some(record) => Err(StepError::Assertion(format!(
            "record still present: {record:?}"
        ))),
    }
}
