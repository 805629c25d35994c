//! Workspace lifecycle orchestration.
//!
//! [`WorkspaceController`] sequences control-plane calls for one student at a
//! time. It keeps no local view of remote state: every operation re-queries
//! the control plane, and the access record store is only consulted for the
//! token that must survive machine recreation.

use std::fmt::Display;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::FlyConfig;
use crate::control_plane::{ApiFailure, ControlPlane, Machine};
use crate::descriptors::{AppCreate, MachineCreate, MachineInputs, VolumeCreate};
use crate::records::{AccessRecord, RecordStore};
use crate::workspace::{ResourceTier, StudentId, WorkspaceNames, generate_access_token};

mod error;
mod outcome;
mod power;

pub use error::{LifecycleError, ProvisionStep};
pub use outcome::{
    DeleteOutcome, MachineReport, MachineResult, ProvisionOutcome, StartOutcome, StopOutcome,
    WorkspaceStatus, WorkspaceSummary, any_failed,
};

/// Drives provision, stop, start, delete, and list for student workspaces.
#[derive(Debug)]
pub struct WorkspaceController<C, S> {
    config: FlyConfig,
    control_plane: C,
    records: S,
    settle_delay: Duration,
    rollback: bool,
}

impl<C, S> WorkspaceController<C, S>
where
    C: ControlPlane,
    S: RecordStore,
{
    /// Creates a controller. The settle delay and rollback policy come from
    /// `config`.
    #[must_use]
    pub fn new(config: FlyConfig, control_plane: C, records: S) -> Self {
        let settle_delay = config.volume_settle_delay();
        let rollback = config.rollback_on_failure;
        Self {
            config,
            control_plane,
            records,
            settle_delay,
            rollback,
        }
    }

    /// Overrides the delay between volume and machine creation.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Enables or disables deleting the application when provisioning fails
    /// after it was created.
    #[must_use]
    pub const fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Configuration the controller was built with.
    #[must_use]
    pub const fn config(&self) -> &FlyConfig {
        &self.config
    }

    /// Control plane used for remote calls.
    #[must_use]
    pub const fn control_plane(&self) -> &C {
        &self.control_plane
    }

    /// Store holding access records.
    #[must_use]
    pub const fn records(&self) -> &S {
        &self.records
    }

    /// Validates `raw_id` and derives the workspace names.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidStudentId`] when the identifier cannot
    /// name remote resources.
    pub fn names(&self, raw_id: &str) -> Result<WorkspaceNames, LifecycleError> {
        let student_id = StudentId::parse(raw_id)?;
        Ok(WorkspaceNames::new(&self.config, student_id)?)
    }

    /// Creates the application, volume, and machine for a student and records
    /// the access token.
    ///
    /// An existing application short-circuits with
    /// [`ProvisionOutcome::AlreadyExists`] before any mutation. A duplicate
    /// reported by the create call itself becomes
    /// [`ProvisionOutcome::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the identifier is invalid, the lookup
    /// or a create step fails, or the record cannot be saved.
    pub async fn provision(
        &self,
        raw_id: &str,
        tier: ResourceTier,
    ) -> Result<ProvisionOutcome, LifecycleError> {
        let names = self.names(raw_id)?;

        let existing = self
            .control_plane
            .get_app(&names.app_name)
            .await
            .map_err(|source| LifecycleError::Lookup {
                app_name: names.app_name.clone(),
                source,
            })?;
        if existing.is_some() {
            info!(app = %names.app_name, "application already exists");
            return Ok(ProvisionOutcome::AlreadyExists {
                access_url: self.stored_url(&names.student_id),
                app_name: names.app_name,
                hostname: names.hostname,
            });
        }

        let access_token = generate_access_token();

        let app_request = AppCreate::for_workspace(&self.config, &names);
        match self.control_plane.create_app(&app_request).await {
            Ok(()) => info!(app = %names.app_name, "application created"),
            Err(err) if err.is_conflict() => {
                warn!(app = %names.app_name, error = %err, "application created concurrently");
                return Ok(ProvisionOutcome::Conflict {
                    app_name: names.app_name,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                return Err(LifecycleError::Step {
                    step: ProvisionStep::CreateApp,
                    app_name: names.app_name,
                    message: err.to_string(),
                    source: err,
                });
            }
        }

        let volume_request = VolumeCreate::for_workspace(&self.config, &names);
        let volume = match self
            .control_plane
            .create_volume(&names.app_name, &volume_request)
            .await
        {
            Ok(volume) => volume,
            Err(err) => {
                return Err(self
                    .abort_provision(ProvisionStep::CreateVolume, &names, err, None)
                    .await);
            }
        };
        info!(app = %names.app_name, volume = %volume.id, "volume created");
        self.settle().await;

        let machine_request = MachineCreate::for_workspace(
            &self.config,
            &names,
            MachineInputs {
                volume_id: &volume.id,
                access_token: &access_token,
                tier,
            },
        );
        let machine = match self
            .control_plane
            .create_machine(&names.app_name, &machine_request)
            .await
        {
            Ok(machine) => machine,
            Err(err) => {
                return Err(self
                    .abort_provision(ProvisionStep::CreateMachine, &names, err, Some(&volume.id))
                    .await);
            }
        };
        info!(app = %names.app_name, machine = %machine.id, "machine created");

        let record = AccessRecord::new(&names, access_token, tier);
        self.records
            .save(&record)
            .map_err(|source| LifecycleError::RecordNotSaved {
                url: record.url.clone(),
                source,
            })?;
        Ok(ProvisionOutcome::Created(record))
    }

    /// Deletes the student's application, which cascades to its volumes and
    /// machines, then removes the local access record.
    ///
    /// Without `confirmed` nothing is contacted and
    /// [`DeleteOutcome::Cancelled`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the identifier is invalid or the
    /// delete call fails for a reason other than a missing application. A
    /// record that cannot be removed is logged and reported as
    /// `record_removed: false`, since the remote deletion already happened.
    pub async fn delete(
        &self,
        raw_id: &str,
        confirmed: bool,
    ) -> Result<DeleteOutcome, LifecycleError> {
        let names = self.names(raw_id)?;
        if !confirmed {
            return Ok(DeleteOutcome::Cancelled);
        }

        let existed = match self.control_plane.delete_app(&names.app_name).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => {
                return Err(LifecycleError::api("delete application", &names.app_name, err));
            }
        };

        let record_removed = match self.records.remove(&names.student_id) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(student = %names.student_id, error = %err, "access record not removed");
                false
            }
        };
        if existed {
            info!(app = %names.app_name, record_removed, "application deleted");
            Ok(DeleteOutcome::Deleted { record_removed })
        } else {
            Ok(DeleteOutcome::NotFound { record_removed })
        }
    }

    /// Lists every workspace application in the organisation with the state
    /// of its first machine, sorted by student identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Api`] when applications cannot be listed.
    /// Per-application machine failures are reported in the summary instead.
    pub async fn list(&self) -> Result<Vec<WorkspaceSummary>, LifecycleError> {
        let org = self.config.organization.trim();
        let apps = self
            .control_plane
            .list_apps(org)
            .await
            .map_err(|err| LifecycleError::api("list applications", org, err))?;

        let prefix = self.config.app_prefix.trim();
        let mut summaries = Vec::new();
        for app in apps {
            let Some(student_id) = app.name.strip_prefix(prefix) else {
                continue;
            };
            if student_id.is_empty() {
                continue;
            }
            let status = match self.control_plane.list_machines(&app.name).await {
                Ok(machines) => status_of(machines.first()),
                Err(err) => WorkspaceStatus::Error(err.to_string()),
            };
            summaries.push(WorkspaceSummary {
                student_id: student_id.to_owned(),
                app_name: app.name.clone(),
                status,
            });
        }
        summaries.sort_by(|left, right| left.student_id.cmp(&right.student_id));
        Ok(summaries)
    }

    fn stored_url(&self, student_id: &StudentId) -> Option<String> {
        match self.records.load(student_id) {
            Ok(record) => record.map(|stored| stored.url),
            Err(err) => {
                warn!(student = %student_id, error = %err, "access record unreadable");
                None
            }
        }
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    async fn abort_provision(
        &self,
        step: ProvisionStep,
        names: &WorkspaceNames,
        err: ApiFailure,
        volume_id: Option<&str>,
    ) -> LifecycleError {
        let message = if self.rollback {
            self.rollback_with_note(names, &err).await
        } else {
            let left = leftover_resources(names, volume_id);
            warn!(
                app = %names.app_name,
                resources = %left,
                "provisioning aborted; resources left in place"
            );
            format!("{err} (left in place: {left}; run delete to clean up)")
        };
        LifecycleError::Step {
            step,
            app_name: names.app_name.clone(),
            message,
            source: err,
        }
    }

    async fn rollback_with_note<E: Display>(&self, names: &WorkspaceNames, err: &E) -> String {
        let rollback_error = self.control_plane.delete_app(&names.app_name).await.err();
        if rollback_error.is_none() {
            info!(app = %names.app_name, "rolled back partially provisioned application");
        }
        append_rollback_note(err.to_string(), rollback_error.as_ref())
    }
}

fn status_of(machine: Option<&Machine>) -> WorkspaceStatus {
    machine.map_or(WorkspaceStatus::Unavailable, |first| {
        WorkspaceStatus::Machine(first.state.clone())
    })
}

fn leftover_resources(names: &WorkspaceNames, volume_id: Option<&str>) -> String {
    match volume_id {
        Some(id) => format!("application {}, volume {id}", names.app_name),
        None => format!("application {}", names.app_name),
    }
}

fn append_rollback_note<E: Display>(message: String, rollback_error: Option<&E>) -> String {
    if let Some(rollback) = rollback_error {
        format!("{message} (rollback also failed: {rollback})")
    } else {
        format!("{message} (application rolled back)")
    }
}
