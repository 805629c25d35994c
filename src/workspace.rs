//! Student identifiers and the names derived from them.
//!
//! Every remote resource a workspace owns is named after the student, so the
//! identifier doubles as a DNS label component and must be validated before
//! any request is built.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FlyConfig;

const MAX_LABEL_LEN: usize = 63;
const MAX_VOLUME_NAME_LEN: usize = 30;
const TOKEN_BYTES: usize = 32;

/// Errors raised when a student identifier is unusable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StudentIdError {
    /// Raised when the identifier is blank.
    #[error("student id must not be empty")]
    Empty,
    /// Raised when the identifier contains characters outside `[a-z0-9-]`.
    #[error("student id '{0}' may only contain lowercase letters, digits, and '-'")]
    InvalidCharacters(String),
    /// Raised when the identifier starts or ends with a hyphen.
    #[error("student id '{0}' must not start or end with '-'")]
    EdgeHyphen(String),
    /// Raised when the derived application name exceeds a DNS label.
    #[error("application name '{app_name}' exceeds {MAX_LABEL_LEN} characters")]
    TooLong {
        /// Application name that would have been used.
        app_name: String,
    },
}

/// Validated student identifier, safe to embed in a DNS label.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StudentId(String);

impl StudentId {
    /// Trims and lowercases `raw`, then checks the character set.
    ///
    /// The length limit depends on the application prefix, so it is enforced
    /// by [`WorkspaceNames::new`].
    ///
    /// # Errors
    ///
    /// Returns [`StudentIdError`] when the identifier is blank or contains
    /// characters that are not valid in a hostname label.
    pub fn parse(raw: &str) -> Result<Self, StudentIdError> {
        let value = raw.trim().to_ascii_lowercase();
        if value.is_empty() {
            return Err(StudentIdError::Empty);
        }
        if !value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        {
            return Err(StudentIdError::InvalidCharacters(value));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(StudentIdError::EdgeHyphen(value));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for StudentId {
    type Err = StudentIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Compute and memory allocation requested for a workspace machine.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    /// One shared CPU with 512 MB of memory.
    #[default]
    Standard,
    /// Two shared CPUs with 2 GB of memory.
    High,
}

impl ResourceTier {
    /// Number of shared CPUs for this tier.
    #[must_use]
    pub const fn cpus(self) -> u32 {
        match self {
            Self::Standard => 1,
            Self::High => 2,
        }
    }

    /// Memory in megabytes for this tier.
    #[must_use]
    pub const fn memory_mb(self) -> u32 {
        match self {
            Self::Standard => 512,
            Self::High => 2048,
        }
    }

    /// Lowercase name used on the command line and in batch files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when a tier name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown resource tier '{0}' (expected 'standard' or 'high')")]
pub struct UnknownTier(pub String);

impl FromStr for ResourceTier {
    type Err = UnknownTier;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            other => Err(UnknownTier(other.to_owned())),
        }
    }
}

/// Resource names derived from a student identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkspaceNames {
    /// Student the workspace belongs to.
    pub student_id: StudentId,
    /// Application (and machine) name: prefix followed by the student id.
    pub app_name: String,
    /// Public hostname of the workspace.
    pub hostname: String,
    /// Name of the persistent volume.
    pub volume_name: String,
}

impl WorkspaceNames {
    /// Derives every name used for `student_id` under `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StudentIdError::TooLong`] when the application name would not
    /// fit in a DNS label.
    pub fn new(config: &FlyConfig, student_id: StudentId) -> Result<Self, StudentIdError> {
        let app_name = format!("{}{}", config.app_prefix.trim(), student_id.as_str());
        if app_name.len() > MAX_LABEL_LEN {
            return Err(StudentIdError::TooLong { app_name });
        }
        let hostname = format!("{app_name}.{}", config.base_domain.trim());
        let volume_name = volume_name_for(&student_id);
        Ok(Self {
            student_id,
            app_name,
            hostname,
            volume_name,
        })
    }

    /// Returns the Jupyter Lab URL for `token`.
    #[must_use]
    pub fn access_url(&self, token: &str) -> String {
        access_url(&self.hostname, token)
    }

    /// Returns the URL without a token, used when the token is unknown.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("https://{}/lab", self.hostname)
    }
}

/// Builds the Jupyter Lab URL for a hostname and token.
#[must_use]
pub fn access_url(hostname: &str, token: &str) -> String {
    format!("https://{hostname}/lab?token={token}")
}

fn volume_name_for(student_id: &StudentId) -> String {
    let mut name = format!("vol_{}", student_id.as_str().replace('-', "_"));
    name.truncate(MAX_VOLUME_NAME_LEN);
    name
}

/// Mints a fresh URL-safe access token from 32 bytes of thread-local CSPRNG
/// output.
#[must_use]
pub fn generate_access_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
