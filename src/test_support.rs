//! Test support utilities shared across unit and integration tests.
//!
//! [`MemoryControlPlane`] models the Machines API closely enough to drive the
//! lifecycle controller without a network: applications own volumes and
//! machines, deleting an application removes both, and every call is logged
//! so tests can assert on exactly what was sent.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{DEFAULT_API_HOST, FlyConfig};
use crate::control_plane::{
    ApiFailure, ApiFuture, App, ControlPlane, ErrorBody, Machine, MachineId, MachineState,
    Volume,
};
use crate::descriptors::{AppCreate, MachineCreate, VolumeCreate};
use crate::records::{AccessRecord, RecordStore, RecordStoreError};
use crate::workspace::StudentId;

/// Returns a complete configuration suitable for tests.
///
/// The volume settle delay is zero so tests never sleep.
#[must_use]
pub fn sample_config() -> FlyConfig {
    FlyConfig {
        api_token: String::from("test-token"),
        organization: String::from("personal"),
        jupyter_image: String::from("registry.fly.io/jupyter-lab:latest"),
        base_domain: String::from("fly.dev"),
        api_host: String::from(DEFAULT_API_HOST),
        app_prefix: String::from("jupyter-"),
        region: String::from("ams"),
        internal_port: 8888,
        idle_timeout: 300,
        volume_size_gb: 1,
        volume_settle_secs: 0,
        request_timeout_secs: 30,
        records_dir: String::from(".fly-configs"),
        batch_concurrency: 4,
        rollback_on_failure: false,
    }
}

/// Control-plane endpoints, used to address calls and injected failures.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// `GET /v1/apps/{app}`.
    GetApp,
    /// `GET /v1/apps?org_slug=...`.
    ListApps,
    /// `POST /v1/apps`.
    CreateApp,
    /// `DELETE /v1/apps/{app}`.
    DeleteApp,
    /// `GET /v1/apps/{app}/volumes`.
    ListVolumes,
    /// `POST /v1/apps/{app}/volumes`.
    CreateVolume,
    /// `GET /v1/apps/{app}/machines`.
    ListMachines,
    /// `POST /v1/apps/{app}/machines`.
    CreateMachine,
    /// `POST /v1/apps/{app}/machines/{id}/start`.
    StartMachine,
    /// `POST /v1/apps/{app}/machines/{id}/stop`.
    StopMachine,
}

impl Operation {
    /// Returns `true` for operations that change remote state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::CreateApp
                | Self::DeleteApp
                | Self::CreateVolume
                | Self::CreateMachine
                | Self::StartMachine
                | Self::StopMachine
        )
    }
}

/// One call recorded by [`MemoryControlPlane`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// Endpoint that was called.
    pub operation: Operation,
    /// Application (or organisation, for [`Operation::ListApps`]) addressed.
    pub target: String,
    /// Machine addressed by start and stop calls.
    pub machine_id: Option<String>,
}

#[derive(Debug, Default)]
struct AppState {
    volumes: Vec<Volume>,
    machines: Vec<Machine>,
}

#[derive(Debug, Default)]
struct PlaneState {
    apps: BTreeMap<String, AppState>,
    calls: Vec<Call>,
    failures: HashMap<Operation, ApiFailure>,
    app_failures: HashMap<(Operation, String), ApiFailure>,
    machine_failures: HashMap<String, ApiFailure>,
    created_machines: Vec<(String, MachineCreate)>,
    created_volumes: Vec<(String, VolumeCreate)>,
    next_id: u32,
    create_app_latency: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl PlaneState {
    fn record(&mut self, operation: Operation, target: &str, machine_id: Option<&MachineId>) {
        self.calls.push(Call {
            operation,
            target: target.to_owned(),
            machine_id: machine_id.map(|id| id.as_str().to_owned()),
        });
    }

    fn injected(&self, operation: Operation, target: &str) -> Option<ApiFailure> {
        self.app_failures
            .get(&(operation, target.to_owned()))
            .or_else(|| self.failures.get(&operation))
            .cloned()
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn app_mut(&mut self, app_name: &str) -> Result<&mut AppState, ApiFailure> {
        self.apps
            .get_mut(app_name)
            .ok_or_else(|| not_found(&format!("app {app_name} not found")))
    }
}

/// In-memory control plane with failure injection and a call log.
#[derive(Clone, Debug, Default)]
pub struct MemoryControlPlane {
    state: Arc<StdMutex<PlaneState>>,
}

impl MemoryControlPlane {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, PlaneState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("memory control plane lock poisoned: {err}"))
    }

    /// Seeds an application with no volumes or machines.
    pub fn insert_app(&self, app_name: &str) {
        self.lock().apps.entry(app_name.to_owned()).or_default();
    }

    /// Seeds a volume in an existing (or implicitly created) application.
    pub fn insert_volume(&self, app_name: &str, volume_id: &str, volume_name: &str) {
        self.lock()
            .apps
            .entry(app_name.to_owned())
            .or_default()
            .volumes
            .push(Volume {
                id: volume_id.to_owned(),
                name: volume_name.to_owned(),
                state: Some(String::from("created")),
                size_gb: Some(1),
            });
    }

    /// Seeds a machine in an existing (or implicitly created) application.
    pub fn insert_machine(&self, app_name: &str, machine_id: &str, state: &str) {
        self.lock()
            .apps
            .entry(app_name.to_owned())
            .or_default()
            .machines
            .push(Machine {
                id: MachineId::from(machine_id),
                name: app_name.to_owned(),
                state: MachineState::from(state),
                region: Some(String::from("ams")),
                instance_id: None,
            });
    }

    /// Makes every call to `operation` fail with `failure`.
    pub fn fail(&self, operation: Operation, failure: ApiFailure) {
        self.lock().failures.insert(operation, failure);
    }

    /// Makes calls to `operation` against `app_name` fail with `failure`.
    pub fn fail_for_app(&self, operation: Operation, app_name: &str, failure: ApiFailure) {
        self.lock()
            .app_failures
            .insert((operation, app_name.to_owned()), failure);
    }

    /// Makes start and stop requests for `machine_id` fail with `failure`.
    pub fn fail_machine(&self, machine_id: &str, failure: ApiFailure) {
        self.lock()
            .machine_failures
            .insert(machine_id.to_owned(), failure);
    }

    /// Delays every application creation, which lets tests observe how many
    /// creations overlap.
    pub fn set_create_app_latency(&self, latency: Duration) {
        self.lock().create_app_latency = Some(latency);
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Returns the operations called so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(|call| call.operation).collect()
    }

    /// Counts the calls made to `operation`.
    #[must_use]
    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Returns `true` when the application currently exists.
    #[must_use]
    pub fn has_app(&self, app_name: &str) -> bool {
        self.lock().apps.contains_key(app_name)
    }

    /// Returns the machines of an application.
    #[must_use]
    pub fn machines(&self, app_name: &str) -> Vec<Machine> {
        self.lock()
            .apps
            .get(app_name)
            .map(|app| app.machines.clone())
            .unwrap_or_default()
    }

    /// Returns the volumes of an application.
    #[must_use]
    pub fn volumes(&self, app_name: &str) -> Vec<Volume> {
        self.lock()
            .apps
            .get(app_name)
            .map(|app| app.volumes.clone())
            .unwrap_or_default()
    }

    /// Returns every machine descriptor submitted, with its application.
    #[must_use]
    pub fn created_machines(&self) -> Vec<(String, MachineCreate)> {
        self.lock().created_machines.clone()
    }

    /// Returns every volume descriptor submitted, with its application.
    #[must_use]
    pub fn created_volumes(&self) -> Vec<(String, VolumeCreate)> {
        self.lock().created_volumes.clone()
    }

    /// Highest number of application creations observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }
}

fn not_found(message: &str) -> ApiFailure {
    ApiFailure::Status {
        status: 404,
        body: ErrorBody::Json(json!({ "error": message })),
    }
}

/// Builds the 422 the platform returns for a taken application name.
#[must_use]
pub fn name_taken() -> ApiFailure {
    ApiFailure::Status {
        status: 422,
        body: ErrorBody::Json(json!({ "error": "Name has already been taken" })),
    }
}

/// Builds a generic server error.
#[must_use]
pub fn server_error(message: &str) -> ApiFailure {
    ApiFailure::Status {
        status: 500,
        body: ErrorBody::Text(message.to_owned()),
    }
}

impl ControlPlane for MemoryControlPlane {
    fn get_app<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Option<App>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::GetApp, app_name, None);
            if let Some(failure) = state.injected(Operation::GetApp, app_name) {
                return Err(failure);
            }
            Ok(state.apps.get(app_name).map(|app| App {
                name: app_name.to_owned(),
                id: Some(format!("id-{app_name}")),
                machine_count: u32::try_from(app.machines.len()).ok(),
            }))
        })
    }

    fn list_apps<'a>(&'a self, org_slug: &'a str) -> ApiFuture<'a, Vec<App>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::ListApps, org_slug, None);
            if let Some(failure) = state.injected(Operation::ListApps, org_slug) {
                return Err(failure);
            }
            Ok(state
                .apps
                .iter()
                .map(|(name, app)| App {
                    name: name.clone(),
                    id: Some(format!("id-{name}")),
                    machine_count: u32::try_from(app.machines.len()).ok(),
                })
                .collect())
        })
    }

    fn create_app<'a>(&'a self, request: &'a AppCreate) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let latency = {
                let mut state = self.lock();
                state.record(Operation::CreateApp, &request.app_name, None);
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
                state.create_app_latency
            };
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.lock();
            state.in_flight -= 1;
            if let Some(failure) = state.injected(Operation::CreateApp, &request.app_name) {
                return Err(failure);
            }
            if state.apps.contains_key(&request.app_name) {
                return Err(name_taken());
            }
            state
                .apps
                .insert(request.app_name.clone(), AppState::default());
            Ok(())
        })
    }

    fn delete_app<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::DeleteApp, app_name, None);
            if let Some(failure) = state.injected(Operation::DeleteApp, app_name) {
                return Err(failure);
            }
            state
                .apps
                .remove(app_name)
                .map(|_| ())
                .ok_or_else(|| not_found(&format!("app {app_name} not found")))
        })
    }

    fn list_volumes<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::ListVolumes, app_name, None);
            if let Some(failure) = state.injected(Operation::ListVolumes, app_name) {
                return Err(failure);
            }
            Ok(state.app_mut(app_name)?.volumes.clone())
        })
    }

    fn create_volume<'a>(
        &'a self,
        app_name: &'a str,
        request: &'a VolumeCreate,
    ) -> ApiFuture<'a, Volume> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::CreateVolume, app_name, None);
            if let Some(failure) = state.injected(Operation::CreateVolume, app_name) {
                return Err(failure);
            }
            let id = state.next_id("vol_");
            let volume = Volume {
                id,
                name: request.name.clone(),
                state: Some(String::from("created")),
                size_gb: Some(request.size_gb),
            };
            state.app_mut(app_name)?.volumes.push(volume.clone());
            state
                .created_volumes
                .push((app_name.to_owned(), request.clone()));
            Ok(volume)
        })
    }

    fn list_machines<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Vec<Machine>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::ListMachines, app_name, None);
            if let Some(failure) = state.injected(Operation::ListMachines, app_name) {
                return Err(failure);
            }
            Ok(state.app_mut(app_name)?.machines.clone())
        })
    }

    fn create_machine<'a>(
        &'a self,
        app_name: &'a str,
        request: &'a MachineCreate,
    ) -> ApiFuture<'a, Machine> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record(Operation::CreateMachine, app_name, None);
            if let Some(failure) = state.injected(Operation::CreateMachine, app_name) {
                return Err(failure);
            }
            let id = state.next_id("m");
            let machine = Machine {
                id: MachineId::new(id),
                name: request.name.clone(),
                state: MachineState::from("started"),
                region: Some(request.region.clone()),
                instance_id: None,
            };
            state.app_mut(app_name)?.machines.push(machine.clone());
            state
                .created_machines
                .push((app_name.to_owned(), request.clone()));
            Ok(machine)
        })
    }

    fn start_machine<'a>(
        &'a self,
        app_name: &'a str,
        machine_id: &'a MachineId,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.set_machine_state(Operation::StartMachine, app_name, machine_id, "started")
        })
    }

    fn stop_machine<'a>(
        &'a self,
        app_name: &'a str,
        machine_id: &'a MachineId,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.set_machine_state(Operation::StopMachine, app_name, machine_id, "stopped")
        })
    }
}

impl MemoryControlPlane {
    fn set_machine_state(
        &self,
        operation: Operation,
        app_name: &str,
        machine_id: &MachineId,
        target_state: &str,
    ) -> Result<(), ApiFailure> {
        let mut state = self.lock();
        state.record(operation, app_name, Some(machine_id));
        if let Some(failure) = state.injected(operation, app_name) {
            return Err(failure);
        }
        if let Some(failure) = state.machine_failures.get(machine_id.as_str()).cloned() {
            return Err(failure);
        }
        let machine = state
            .app_mut(app_name)?
            .machines
            .iter_mut()
            .find(|machine| &machine.id == machine_id)
            .ok_or_else(|| not_found(&format!("machine {machine_id} not found")))?;
        machine.state = MachineState::from(target_state);
        Ok(())
    }
}

/// In-memory record store keyed by student identifier.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecordStore {
    records: Arc<StdMutex<BTreeMap<String, AccessRecord>>>,
    fail_saves: Arc<StdMutex<bool>>,
    fail_removes: Arc<StdMutex<bool>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> StdMutexGuard<'_, BTreeMap<String, AccessRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|err| panic!("memory record store lock poisoned: {err}"))
    }

    /// Seeds a record.
    pub fn insert(&self, record: AccessRecord) {
        self.records().insert(record.student_id.clone(), record);
    }

    /// Returns the record stored for `student_id`.
    #[must_use]
    pub fn get(&self, student_id: &str) -> Option<AccessRecord> {
        self.records().get(student_id).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns `true` when no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Makes every subsequent save fail.
    pub fn fail_saves(&self) {
        *self
            .fail_saves
            .lock()
            .unwrap_or_else(|err| panic!("memory record store lock poisoned: {err}")) = true;
    }

    /// Makes every subsequent removal fail, leaving records in place.
    pub fn fail_removes(&self) {
        *self
            .fail_removes
            .lock()
            .unwrap_or_else(|err| panic!("memory record store lock poisoned: {err}")) = true;
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, student_id: &StudentId) -> Result<Option<AccessRecord>, RecordStoreError> {
        Ok(self.get(student_id.as_str()))
    }

    fn save(&self, record: &AccessRecord) -> Result<Utf8PathBuf, RecordStoreError> {
        let path = Utf8PathBuf::from(format!("memory/{}/access.json", record.student_id));
        let failing = *self
            .fail_saves
            .lock()
            .unwrap_or_else(|err| panic!("memory record store lock poisoned: {err}"));
        if failing {
            return Err(RecordStoreError::Io {
                path,
                message: String::from("simulated write failure"),
            });
        }
        self.insert(record.clone());
        Ok(path)
    }

    fn remove(&self, student_id: &StudentId) -> Result<bool, RecordStoreError> {
        let failing = *self
            .fail_removes
            .lock()
            .unwrap_or_else(|err| panic!("memory record store lock poisoned: {err}"));
        if failing {
            return Err(RecordStoreError::Io {
                path: Utf8PathBuf::from(format!("memory/{student_id}/access.json")),
                message: String::from("simulated remove failure"),
            });
        }
        Ok(self.records().remove(student_id.as_str()).is_some())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }

    /// Sets `pairs` and removes `removed` while holding a global mutex.
    pub async fn apply(pairs: &[(&str, &str)], removed: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(removed.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + removed.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }
        for key in removed {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
