//! Error types for the workspace lifecycle.

use std::fmt;

use thiserror::Error;

use crate::control_plane::ApiFailure;
use crate::records::RecordStoreError;
use crate::workspace::StudentIdError;

/// Remote side effects performed by provisioning, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionStep {
    /// Creating the application.
    CreateApp,
    /// Creating the notebook volume.
    CreateVolume,
    /// Creating the Jupyter machine.
    CreateMachine,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::CreateApp => "create application",
            Self::CreateVolume => "create volume",
            Self::CreateMachine => "create machine",
        })
    }
}

/// Errors raised by [`super::WorkspaceController`] operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Raised when the student identifier cannot name remote resources.
    #[error("invalid student id: {0}")]
    InvalidStudentId(#[from] StudentIdError),
    /// Raised when the existence check for an application fails.
    #[error("failed to look up {app_name}: {source}")]
    Lookup {
        /// Application that was looked up.
        app_name: String,
        /// Control-plane failure.
        #[source]
        source: ApiFailure,
    },
    /// Raised when a provisioning step fails. `message` lists what was left
    /// behind or how rollback went.
    #[error("failed to {step} for {app_name}: {message}")]
    Step {
        /// Step that failed.
        step: ProvisionStep,
        /// Application being provisioned.
        app_name: String,
        /// Failure description including cleanup notes.
        message: String,
        /// Control-plane failure.
        #[source]
        source: ApiFailure,
    },
    /// Raised when any other control-plane call fails.
    #[error("failed to {operation} for {app_name}: {source}")]
    Api {
        /// Operation that failed, phrased as a verb.
        operation: &'static str,
        /// Application addressed by the call.
        app_name: String,
        /// Control-plane failure.
        #[source]
        source: ApiFailure,
    },
    /// Raised when the workspace exists remotely but its access record could
    /// not be written. The URL is kept so it can still be handed out.
    #[error("workspace is available at {url} but its access record was not saved: {source}")]
    RecordNotSaved {
        /// Access URL of the new workspace.
        url: String,
        /// Storage failure.
        #[source]
        source: RecordStoreError,
    },
    /// Raised when the access record store fails.
    #[error("access record error: {0}")]
    Records(#[from] RecordStoreError),
}

impl LifecycleError {
    pub(super) fn api(operation: &'static str, app_name: &str, source: ApiFailure) -> Self {
        Self::Api {
            operation,
            app_name: app_name.to_owned(),
            source,
        }
    }
}
