//! BDD scenarios for the workspace lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Provision a new workspace"
)]
fn scenario_provision(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Provisioning twice short-circuits"
)]
fn scenario_provision_twice(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Stop skips machines that are already stopped"
)]
fn scenario_stop(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Start recreates a missing machine with the provisioned token"
)]
fn scenario_start_recreates(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Delete without confirmation touches nothing"
)]
fn scenario_delete_unconfirmed(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Delete with confirmation removes the workspace"
)]
fn scenario_delete_confirmed(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
