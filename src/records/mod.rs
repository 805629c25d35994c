//! Durable per-student access records.
//!
//! Each student owns `<root>/<student_id>/access.json`. The record holds the
//! access token that is embedded in every URL handed to the student, so it is
//! written whole (via a temporary file and rename) and never replaced because
//! a read failed.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workspace::{ResourceTier, StudentId, WorkspaceNames};

const RECORD_FILE_NAME: &str = "access.json";
const TEMP_FILE_NAME: &str = "access.json.tmp";

/// Access details persisted for a provisioned workspace.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessRecord {
    /// Student the workspace belongs to.
    pub student_id: String,
    /// Application backing the workspace.
    pub app_name: String,
    /// Public hostname.
    pub hostname: String,
    /// Jupyter Lab URL including the token.
    pub url: String,
    /// Access token minted at first provision.
    #[serde(rename = "token")]
    pub access_token: String,
    /// Resource tier requested at provision time.
    #[serde(default)]
    pub resource_tier: ResourceTier,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
}

impl AccessRecord {
    /// Builds the record for a newly provisioned workspace.
    #[must_use]
    pub fn new(names: &WorkspaceNames, access_token: String, tier: ResourceTier) -> Self {
        Self {
            student_id: names.student_id.as_str().to_owned(),
            app_name: names.app_name.clone(),
            hostname: names.hostname.clone(),
            url: names.access_url(&access_token),
            access_token,
            resource_tier: tier,
            created_at: Utc::now(),
        }
    }
}

/// Errors raised while reading or writing access records.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when an existing record cannot be decoded. The file is left
    /// untouched.
    #[error("access record {path} is unreadable: {message}")]
    Corrupt {
        /// Path of the damaged record.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a record cannot be encoded.
    #[error("failed to encode access record for {student_id}: {message}")]
    Encode {
        /// Student whose record failed to encode.
        student_id: String,
        /// Encoder error message.
        message: String,
    },
}

/// Storage for access records, injected into the lifecycle controller.
pub trait RecordStore {
    /// Reads the record for `student_id`; `Ok(None)` when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError`] when the record exists but cannot be read
    /// or decoded.
    fn load(&self, student_id: &StudentId) -> Result<Option<AccessRecord>, RecordStoreError>;

    /// Writes `record`, replacing any previous record for the same student.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError`] when the record cannot be written.
    fn save(&self, record: &AccessRecord) -> Result<Utf8PathBuf, RecordStoreError>;

    /// Removes the record for `student_id`, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError`] when the record cannot be removed.
    fn remove(&self, student_id: &StudentId) -> Result<bool, RecordStoreError>;
}

/// File-system record store rooted at a configuration directory.
///
/// Writes for the same student are serialised through a per-key lock so
/// concurrent batch workers never interleave on one record. Locks are held
/// only across a single synchronous file operation and are evicted when
/// released.
#[derive(Clone, Debug)]
pub struct FsRecordStore {
    root: Utf8PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FsRecordStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the record file for `student_id`.
    #[must_use]
    pub fn record_path(&self, student_id: &str) -> Utf8PathBuf {
        self.root.join(student_id).join(RECORD_FILE_NAME)
    }

    /// Runs `operation` while holding the lock for `student_id`. The entry is
    /// dropped from the map once no other caller holds it, so the map only
    /// tracks students with an operation in flight.
    fn with_key_lock<T>(&self, student_id: &str, operation: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(student_id.to_owned()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            operation()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks
            .get(student_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(student_id);
        }
        result
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn open_student_dir(&self, student_id: &str) -> Result<Option<Dir>, RecordStoreError> {
        let path = self.root.join(student_id);
        match Dir::open_ambient_dir(&path, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path, &err)),
        }
    }
}

impl RecordStore for FsRecordStore {
    fn load(&self, student_id: &StudentId) -> Result<Option<AccessRecord>, RecordStoreError> {
        self.with_key_lock(student_id.as_str(), || self.read_record(student_id))
    }

    fn save(&self, record: &AccessRecord) -> Result<Utf8PathBuf, RecordStoreError> {
        self.with_key_lock(&record.student_id, || self.write_record(record))
    }

    fn remove(&self, student_id: &StudentId) -> Result<bool, RecordStoreError> {
        self.with_key_lock(student_id.as_str(), || self.remove_record(student_id))
    }
}

impl FsRecordStore {
    fn read_record(&self, student_id: &StudentId) -> Result<Option<AccessRecord>, RecordStoreError> {
        let path = self.record_path(student_id.as_str());
        let Some(dir) = self.open_student_dir(student_id.as_str())? else {
            return Ok(None);
        };
        let contents = match dir.read_to_string(RECORD_FILE_NAME) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, &err)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| RecordStoreError::Corrupt {
                path,
                message: err.to_string(),
            })
    }

    fn write_record(&self, record: &AccessRecord) -> Result<Utf8PathBuf, RecordStoreError> {
        let dir_path = self.root.join(&record.student_id);
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;

        let rendered =
            serde_json::to_string_pretty(record).map_err(|err| RecordStoreError::Encode {
                student_id: record.student_id.clone(),
                message: err.to_string(),
            })?;

        let temp_path = dir_path.join(TEMP_FILE_NAME);
        dir.write(TEMP_FILE_NAME, rendered)
            .map_err(|err| io_error(&temp_path, &err))?;
        let path = dir_path.join(RECORD_FILE_NAME);
        dir.rename(TEMP_FILE_NAME, &dir, RECORD_FILE_NAME)
            .map_err(|err| io_error(&path, &err))?;
        Ok(path)
    }

    fn remove_record(&self, student_id: &StudentId) -> Result<bool, RecordStoreError> {
        let path = self.record_path(student_id.as_str());
        let Some(dir) = self.open_student_dir(student_id.as_str())? else {
            return Ok(false);
        };
        match dir.remove_file(RECORD_FILE_NAME) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path, &err)),
        }
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> RecordStoreError {
    RecordStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
