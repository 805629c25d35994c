//! Core library for the jupyfly workspace provisioner.
//!
//! The crate manages one Jupyter Lab workspace per student on Fly.io: an
//! application, a persistent volume, and a machine, created in that order by
//! the [`WorkspaceController`] and recorded locally so the access token
//! survives machine recreation (provision → stop/start → delete).

pub mod batch;
pub mod config;
pub mod control_plane;
pub mod descriptors;
pub mod fly;
pub mod lifecycle;
pub mod records;
pub mod test_support;
pub mod workspace;

pub use batch::{
    BatchCounts, BatchDriver, BatchEntry, BatchError, BatchLine, BatchReport, CancelFlag,
    EntryReport, EntryResult, load_batch_file, parse_batch,
};
pub use config::{ConfigError, FlyConfig};
pub use control_plane::{ApiFailure, ControlPlane, ErrorBody, MachineId, MachineState};
pub use fly::{FlyClient, FlyControlPlane};
pub use lifecycle::{
    DeleteOutcome, LifecycleError, MachineReport, MachineResult, ProvisionOutcome, ProvisionStep,
    StartOutcome, StopOutcome, WorkspaceController, WorkspaceStatus, WorkspaceSummary, any_failed,
};
pub use records::{AccessRecord, FsRecordStore, RecordStore, RecordStoreError};
pub use workspace::{ResourceTier, StudentId, StudentIdError, WorkspaceNames};
