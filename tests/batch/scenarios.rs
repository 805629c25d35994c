//! BDD scenarios for batch provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{BatchContext, batch_context};

#[scenario(
    path = "tests/features/batch.feature",
    name = "Malformed lines are reported without aborting the batch"
)]
fn scenario_malformed_lines(batch_context: BatchContext) {
    drop(batch_context);
}

#[scenario(
    path = "tests/features/batch.feature",
    name = "Existing workspaces are not recreated"
)]
fn scenario_existing_workspaces(batch_context: BatchContext) {
    drop(batch_context);
}

#[scenario(
    path = "tests/features/batch.feature",
    name = "Cancelled batches skip pending entries"
)]
fn scenario_cancelled_batch(batch_context: BatchContext) {
    drop(batch_context);
}
