//! Shared fixtures for lifecycle BDD scenarios.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use jupyfly::test_support::{MemoryControlPlane, Operation, sample_config};
use jupyfly::{
    AccessRecord, DeleteOutcome, FlyConfig, FsRecordStore, ProvisionOutcome, StartOutcome,
    StopOutcome, WorkspaceController,
};
use rstest::fixture;
use tempfile::TempDir;

pub type Controller = WorkspaceController<MemoryControlPlane, FsRecordStore>;

/// Result of the last `When` step.
#[derive(Clone, Debug)]
pub enum LifecycleResult {
    Provision(ProvisionOutcome),
    Stop(StopOutcome),
    Start(StartOutcome),
    Delete(DeleteOutcome),
    Failure(String),
}

#[derive(Debug)]
pub struct LifecycleContext {
    pub plane: MemoryControlPlane,
    pub records: FsRecordStore,
    pub config: FlyConfig,
    pub provisioned: RefCell<Option<AccessRecord>>,
    pub outcome: RefCell<Option<LifecycleResult>>,
    _records_tmp: Arc<TempDir>,
}

impl LifecycleContext {
    /// Controller over the scenario's control plane and record directory.
    pub fn controller(&self) -> Controller {
        self.controller_for(self.plane.clone())
    }

    /// Controller over another control plane sharing the record directory.
    pub fn controller_for(&self, plane: MemoryControlPlane) -> Controller {
        WorkspaceController::new(self.config.clone(), plane, self.records.clone())
            .with_settle_delay(Duration::ZERO)
    }

    pub fn app_name(&self, student_id: &str) -> String {
        format!("{}{student_id}", self.config.app_prefix)
    }

    pub fn set_outcome(&self, outcome: LifecycleResult) {
        self.outcome.replace(Some(outcome));
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("records temp dir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join(".fly-configs"))
        .unwrap_or_else(|err| panic!("records path should be UTF-8: {}", err.display()));

    LifecycleContext {
        plane: MemoryControlPlane::new(),
        records: FsRecordStore::new(root),
        config: sample_config(),
        provisioned: RefCell::new(None),
        outcome: RefCell::new(None),
        _records_tmp: Arc::new(tmp),
    }
}

/// Maps the operation names used in feature files onto [`Operation`].
pub fn parse_operation(name: &str) -> Option<Operation> {
    let operation = match name {
        "get_app" => Operation::GetApp,
        "list_apps" => Operation::ListApps,
        "create_app" => Operation::CreateApp,
        "delete_app" => Operation::DeleteApp,
        "list_volumes" => Operation::ListVolumes,
        "create_volume" => Operation::CreateVolume,
        "list_machines" => Operation::ListMachines,
        "create_machine" => Operation::CreateMachine,
        "start_machine" => Operation::StartMachine,
        "stop_machine" => Operation::StopMachine,
        _ => return None,
    };
    Some(operation)
}
