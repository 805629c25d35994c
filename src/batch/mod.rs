//! Batch provisioning.
//!
//! [`BatchDriver`] feeds parsed batch lines through
//! [`WorkspaceController::provision`] with a bounded number of students in
//! flight. Lines naming the same student run one after another, so a repeated
//! id finds the first workspace instead of racing it. Every line produces
//! exactly one [`EntryReport`]; a failing student never stops the rest of the
//! batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, warn};

use crate::control_plane::ControlPlane;
use crate::lifecycle::{ProvisionOutcome, WorkspaceController};
use crate::records::RecordStore;
use crate::workspace::StudentId;

mod parse;

pub use parse::{BatchEntry, BatchLine, load_batch_file, parse_batch};

/// Errors raised before a batch can run.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BatchError {
    /// Raised when the batch file cannot be read.
    #[error("failed to read batch file {path}: {message}")]
    Read {
        /// Path of the batch file.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Cooperative cancellation shared between the signal handler and the
/// driver. Checked before each entry starts, never mid-provision.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one batch line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryResult {
    /// A new workspace was created.
    Provisioned {
        /// Access URL of the workspace.
        url: String,
    },
    /// The workspace already existed.
    AlreadyExists {
        /// Existing application.
        app_name: String,
    },
    /// The application was created concurrently by someone else.
    Conflict {
        /// Error reported by the control plane.
        message: String,
    },
    /// Provisioning failed.
    Failed {
        /// Rendered error.
        error: String,
    },
    /// The line was missing a field or carried an unusable value.
    Malformed {
        /// Why the line was rejected.
        reason: String,
    },
    /// The batch was cancelled before this entry started.
    Skipped,
}

impl fmt::Display for EntryResult {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioned { url } => write!(formatter, "provisioned {url}"),
            Self::AlreadyExists { app_name } => write!(formatter, "already exists ({app_name})"),
            Self::Conflict { message } => write!(formatter, "conflict: {message}"),
            Self::Failed { error } => write!(formatter, "failed: {error}"),
            Self::Malformed { reason } => write!(formatter, "malformed: {reason}"),
            Self::Skipped => formatter.write_str("skipped (cancelled)"),
        }
    }
}

/// Report for one batch line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryReport {
    /// One-based line number in the source.
    pub line: usize,
    /// Student identifier as written.
    pub student_id: String,
    /// Outcome.
    pub result: EntryResult,
}

/// Reports for a whole batch, in source order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchReport {
    /// One report per line.
    pub entries: Vec<EntryReport>,
}

/// Per-outcome tallies of a [`BatchReport`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchCounts {
    /// Newly provisioned workspaces.
    pub provisioned: usize,
    /// Workspaces that already existed.
    pub already_exists: usize,
    /// Concurrent-creation conflicts.
    pub conflicts: usize,
    /// Provisioning failures.
    pub failed: usize,
    /// Malformed lines.
    pub malformed: usize,
    /// Entries skipped after cancellation.
    pub skipped: usize,
}

impl BatchReport {
    /// Tallies the entries by outcome.
    #[must_use]
    pub fn counts(&self) -> BatchCounts {
        self.entries
            .iter()
            .fold(BatchCounts::default(), |mut counts, entry| {
                match entry.result {
                    EntryResult::Provisioned { .. } => counts.provisioned += 1,
                    EntryResult::AlreadyExists { .. } => counts.already_exists += 1,
                    EntryResult::Conflict { .. } => counts.conflicts += 1,
                    EntryResult::Failed { .. } => counts.failed += 1,
                    EntryResult::Malformed { .. } => counts.malformed += 1,
                    EntryResult::Skipped => counts.skipped += 1,
                }
                counts
            })
    }

    /// Returns the report for `student_id`, if the batch contained it.
    #[must_use]
    pub fn entry(&self, student_id: &str) -> Option<&EntryReport> {
        self.entries
            .iter()
            .find(|entry| entry.student_id == student_id)
    }
}

impl fmt::Display for BatchCounts {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} provisioned, {} already existed, {} conflicts, {} failed, {} malformed, {} skipped",
            self.provisioned,
            self.already_exists,
            self.conflicts,
            self.failed,
            self.malformed,
            self.skipped
        )
    }
}

/// Runs batch lines through a [`WorkspaceController`].
#[derive(Debug)]
pub struct BatchDriver<'a, C, S> {
    controller: &'a WorkspaceController<C, S>,
    concurrency: usize,
    cancel: CancelFlag,
}

impl<'a, C, S> BatchDriver<'a, C, S>
where
    C: ControlPlane,
    S: RecordStore,
{
    /// Creates a driver provisioning at most `concurrency` students at once.
    /// A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(controller: &'a WorkspaceController<C, S>, concurrency: usize) -> Self {
        Self {
            controller,
            concurrency: concurrency.max(1),
            cancel: CancelFlag::new(),
        }
    }

    /// Uses `cancel` as the cancellation flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the batch before the next entry starts.
    #[must_use]
    pub const fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Processes every line and returns reports in source order.
    pub async fn run(&self, lines: Vec<BatchLine>) -> BatchReport {
        let groups: Vec<Vec<EntryReport>> = stream::iter(group_by_student(lines))
            .map(|group| self.process_group(group))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let mut entries: Vec<EntryReport> = groups.into_iter().flatten().collect();
        entries.sort_by_key(|entry| entry.line);

        let report = BatchReport { entries };
        info!(summary = %report.counts(), "batch finished");
        report
    }

    async fn process_group(&self, group: Vec<BatchLine>) -> Vec<EntryReport> {
        let mut reports = Vec::with_capacity(group.len());
        for line in group {
            reports.push(self.process(line).await);
        }
        reports
    }

    async fn process(&self, line: BatchLine) -> EntryReport {
        let entry = match line {
            BatchLine::Entry(entry) => entry,
            BatchLine::Malformed {
                line,
                student_id,
                reason,
            } => {
                warn!(line, reason = %reason, "malformed batch line");
                return EntryReport {
                    line,
                    student_id,
                    result: EntryResult::Malformed { reason },
                };
            }
        };

        if self.cancel.is_cancelled() {
            return EntryReport {
                line: entry.line,
                student_id: entry.student_id,
                result: EntryResult::Skipped,
            };
        }

        let result = match self
            .controller
            .provision(&entry.student_id, entry.tier)
            .await
        {
            Ok(ProvisionOutcome::Created(record)) => EntryResult::Provisioned { url: record.url },
            Ok(ProvisionOutcome::AlreadyExists { app_name, .. }) => {
                EntryResult::AlreadyExists { app_name }
            }
            Ok(ProvisionOutcome::Conflict { message, .. }) => EntryResult::Conflict { message },
            Err(err) => {
                warn!(student = %entry.student_id, error = %err, "batch entry failed");
                EntryResult::Failed {
                    error: err.to_string(),
                }
            }
        };
        EntryReport {
            line: entry.line,
            student_id: entry.student_id,
            result,
        }
    }
}

/// Splits `lines` into per-student groups in first-seen order. Ids are
/// compared after normalisation; lines without a valid id get a group each.
fn group_by_student(lines: Vec<BatchLine>) -> Vec<Vec<BatchLine>> {
    let mut groups: Vec<Vec<BatchLine>> = Vec::new();
    let mut group_of: HashMap<StudentId, usize> = HashMap::new();
    for line in lines {
        let student = match &line {
            BatchLine::Entry(entry) => StudentId::parse(&entry.student_id).ok(),
            BatchLine::Malformed { .. } => None,
        };
        let existing = student
            .as_ref()
            .and_then(|id| group_of.get(id).copied())
            .and_then(|index| groups.get_mut(index));
        if let Some(group) = existing {
            group.push(line);
            continue;
        }
        if let Some(id) = student {
            group_of.insert(id, groups.len());
        }
        groups.push(vec![line]);
    }
    groups
}
