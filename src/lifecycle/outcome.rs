//! Results reported by lifecycle operations.

use std::fmt;

use crate::control_plane::{ApiFailure, MachineId, MachineState};
use crate::records::AccessRecord;

/// Result of [`super::WorkspaceController::provision`].
#[derive(Clone, Debug, PartialEq)]
pub enum ProvisionOutcome {
    /// Every resource was created and the access record saved.
    Created(AccessRecord),
    /// The application already existed; nothing was changed.
    AlreadyExists {
        /// Existing application.
        app_name: String,
        /// Public hostname.
        hostname: String,
        /// Access URL from the stored record, when one exists.
        access_url: Option<String>,
    },
    /// Another actor created the application between the existence check and
    /// the create call.
    Conflict {
        /// Contested application.
        app_name: String,
        /// Error reported by the control plane.
        message: String,
    },
}

/// What happened to one machine during stop or start.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineResult {
    /// A stop request was accepted.
    Stopped,
    /// The machine was already stopped; no request was sent.
    AlreadyStopped,
    /// A start request was accepted.
    Started,
    /// The machine was already running; no request was sent.
    AlreadyStarted,
    /// The request failed.
    Failed(ApiFailure),
}

impl MachineResult {
    /// Returns `true` when the request failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for MachineResult {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => formatter.write_str("stopped"),
            Self::AlreadyStopped => formatter.write_str("already stopped"),
            Self::Started => formatter.write_str("started"),
            Self::AlreadyStarted => formatter.write_str("already started"),
            Self::Failed(failure) => write!(formatter, "failed: {failure}"),
        }
    }
}

/// Per-machine line of a stop or start report.
#[derive(Clone, Debug, PartialEq)]
pub struct MachineReport {
    /// Machine addressed.
    pub machine_id: MachineId,
    /// What happened to it.
    pub result: MachineResult,
}

/// Result of [`super::WorkspaceController::stop`].
#[derive(Clone, Debug, PartialEq)]
pub enum StopOutcome {
    /// The application is missing or has no machines.
    NothingToStop,
    /// Every machine was examined.
    Stopped(Vec<MachineReport>),
}

/// Result of [`super::WorkspaceController::start`].
#[derive(Clone, Debug, PartialEq)]
pub enum StartOutcome {
    /// The application does not exist.
    NoInstance,
    /// Every existing machine was examined.
    Started(Vec<MachineReport>),
    /// The application had no machines and a new one was created.
    Recreated {
        /// Identifier of the new machine.
        machine_id: MachineId,
        /// Access URL for the workspace.
        access_url: String,
        /// `true` when the stored token was reused, keeping earlier URLs valid.
        token_reused: bool,
    },
}

/// Returns `true` when any report records a failed request.
#[must_use]
pub fn any_failed(reports: &[MachineReport]) -> bool {
    reports.iter().any(|report| report.result.is_failure())
}

/// Result of [`super::WorkspaceController::delete`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// The caller did not confirm; nothing was touched.
    Cancelled,
    /// The application was deleted.
    Deleted {
        /// Whether a local access record was removed as well.
        record_removed: bool,
    },
    /// The application did not exist.
    NotFound {
        /// Whether a stale local access record was removed.
        record_removed: bool,
    },
}

/// Observed status of a listed workspace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkspaceStatus {
    /// State of the first machine.
    Machine(MachineState),
    /// The application has no machines.
    Unavailable,
    /// Machines could not be listed.
    Error(String),
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine(state) => write!(formatter, "{state}"),
            Self::Unavailable => formatter.write_str("unavailable"),
            Self::Error(message) => write!(formatter, "error: {message}"),
        }
    }
}

/// One row of [`super::WorkspaceController::list`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkspaceSummary {
    /// Student identifier recovered from the application name.
    pub student_id: String,
    /// Application name.
    pub app_name: String,
    /// Observed status.
    pub status: WorkspaceStatus,
}
