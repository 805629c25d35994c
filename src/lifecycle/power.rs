//! Stop and start, including machine recreation for emptied applications.

use tracing::{info, warn};

use crate::control_plane::{ControlPlane, Machine};
use crate::descriptors::{MachineCreate, MachineInputs, VolumeCreate};
use crate::records::{AccessRecord, RecordStore};
use crate::workspace::{ResourceTier, WorkspaceNames, generate_access_token};

use super::{
    LifecycleError, MachineReport, MachineResult, StartOutcome, StopOutcome, WorkspaceController,
};

impl<C, S> WorkspaceController<C, S>
where
    C: ControlPlane,
    S: RecordStore,
{
    /// Stops every machine of the student's application that is not already
    /// stopped.
    ///
    /// A missing application or an empty machine list yields
    /// [`StopOutcome::NothingToStop`]. Failures are reported per machine and
    /// never prevent the remaining machines from being attempted.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the identifier is invalid or the
    /// machines cannot be listed.
    pub async fn stop(&self, raw_id: &str) -> Result<StopOutcome, LifecycleError> {
        let names = self.names(raw_id)?;
        let Some(machines) = self.machines_if_present(&names).await? else {
            return Ok(StopOutcome::NothingToStop);
        };
        if machines.is_empty() {
            return Ok(StopOutcome::NothingToStop);
        }

        let mut reports = Vec::with_capacity(machines.len());
        for machine in machines {
            let result = if machine.state.is_stopped() {
                MachineResult::AlreadyStopped
            } else {
                match self
                    .control_plane
                    .stop_machine(&names.app_name, &machine.id)
                    .await
                {
                    Ok(()) => MachineResult::Stopped,
                    Err(err) => {
                        warn!(
                            app = %names.app_name,
                            machine = %machine.id,
                            error = %err,
                            "stop failed"
                        );
                        MachineResult::Failed(err)
                    }
                }
            };
            reports.push(MachineReport {
                machine_id: machine.id,
                result,
            });
        }
        info!(app = %names.app_name, machines = reports.len(), "stop processed");
        Ok(StopOutcome::Stopped(reports))
    }

    /// Starts every machine that is not running, or recreates the machine
    /// when the application has none.
    ///
    /// Recreation reuses the stored access token so URLs already handed to
    /// the student keep working; a fresh token is minted and recorded only
    /// when no record exists.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the identifier is invalid, a lookup
    /// fails, the stored record is unreadable, or recreation fails.
    pub async fn start(&self, raw_id: &str) -> Result<StartOutcome, LifecycleError> {
        let names = self.names(raw_id)?;
        let app = self
            .control_plane
            .get_app(&names.app_name)
            .await
            .map_err(|source| LifecycleError::Lookup {
                app_name: names.app_name.clone(),
                source,
            })?;
        if app.is_none() {
            return Ok(StartOutcome::NoInstance);
        }
        let Some(machines) = self.machines_if_present(&names).await? else {
            return Ok(StartOutcome::NoInstance);
        };

        if machines.is_empty() {
            return self.recreate_machine(&names).await;
        }

        let mut reports = Vec::with_capacity(machines.len());
        for machine in machines {
            let result = if machine.state.is_started() {
                MachineResult::AlreadyStarted
            } else {
                match self
                    .control_plane
                    .start_machine(&names.app_name, &machine.id)
                    .await
                {
                    Ok(()) => MachineResult::Started,
                    Err(err) => {
                        warn!(
                            app = %names.app_name,
                            machine = %machine.id,
                            error = %err,
                            "start failed"
                        );
                        MachineResult::Failed(err)
                    }
                }
            };
            reports.push(MachineReport {
                machine_id: machine.id,
                result,
            });
        }
        info!(app = %names.app_name, machines = reports.len(), "start processed");
        Ok(StartOutcome::Started(reports))
    }

    async fn machines_if_present(
        &self,
        names: &WorkspaceNames,
    ) -> Result<Option<Vec<Machine>>, LifecycleError> {
        match self.control_plane.list_machines(&names.app_name).await {
            Ok(machines) => Ok(Some(machines)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(LifecycleError::api("list machines", &names.app_name, err)),
        }
    }

    async fn recreate_machine(
        &self,
        names: &WorkspaceNames,
    ) -> Result<StartOutcome, LifecycleError> {
        let stored = self.records.load(&names.student_id)?;
        let token_reused = stored.is_some();
        let (access_token, tier) = stored.map_or_else(
            || (generate_access_token(), ResourceTier::default()),
            |record| (record.access_token, record.resource_tier),
        );

        let volume_id = self.workspace_volume(names).await?;
        let request = MachineCreate::for_workspace(
            &self.config,
            names,
            MachineInputs {
                volume_id: &volume_id,
                access_token: &access_token,
                tier,
            },
        );
        let machine = self
            .control_plane
            .create_machine(&names.app_name, &request)
            .await
            .map_err(|err| LifecycleError::api("recreate machine", &names.app_name, err))?;
        info!(app = %names.app_name, machine = %machine.id, token_reused, "machine recreated");

        let access_url = names.access_url(&access_token);
        if !token_reused {
            let record = AccessRecord::new(names, access_token, tier);
            self.records
                .save(&record)
                .map_err(|source| LifecycleError::RecordNotSaved {
                    url: access_url.clone(),
                    source,
                })?;
        }

        Ok(StartOutcome::Recreated {
            machine_id: machine.id,
            access_url,
            token_reused,
        })
    }

    async fn workspace_volume(&self, names: &WorkspaceNames) -> Result<String, LifecycleError> {
        let volumes = self
            .control_plane
            .list_volumes(&names.app_name)
            .await
            .map_err(|err| LifecycleError::api("list volumes", &names.app_name, err))?;
        let existing = volumes
            .iter()
            .find(|volume| volume.name == names.volume_name)
            .or_else(|| volumes.first());
        if let Some(volume) = existing {
            return Ok(volume.id.clone());
        }

        let request = VolumeCreate::for_workspace(&self.config, names);
        let volume = self
            .control_plane
            .create_volume(&names.app_name, &request)
            .await
            .map_err(|err| LifecycleError::api("create volume", &names.app_name, err))?;
        info!(app = %names.app_name, volume = %volume.id, "volume recreated");
        self.settle().await;
        Ok(volume.id)
    }
}

