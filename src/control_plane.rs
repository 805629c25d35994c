//! Control-plane abstraction for the remote Machines API.
//!
//! [`ControlPlane`] exposes one method per endpoint the lifecycle controller
//! needs. Ordinary HTTP failures are values, not panics: every call resolves
//! to a [`Result`] whose error is an [`ApiFailure`] carrying either the
//! status code and parsed error body or a transport failure.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;

use crate::descriptors::{AppCreate, MachineCreate, VolumeCreate};

/// Future returned by control-plane operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiFailure>> + Send + 'a>>;

/// Error payload returned by the control plane, parsed on a best-effort basis.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorBody {
    /// Body parsed as JSON.
    Json(serde_json::Value),
    /// Body that was not valid JSON, kept verbatim.
    Text(String),
    /// No body at all.
    Empty,
}

impl ErrorBody {
    /// Parses a raw response body, preferring JSON.
    #[must_use]
    pub fn from_bytes(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::Empty;
        }
        serde_json::from_slice(body).map_or_else(
            |_| Self::Text(String::from_utf8_lossy(body).into_owned()),
            Self::Json,
        )
    }

    fn mentions(&self, needle: &str) -> bool {
        match self {
            Self::Json(value) => value.to_string().to_ascii_lowercase().contains(needle),
            Self::Text(text) => text.to_ascii_lowercase().contains(needle),
            Self::Empty => false,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(formatter, "{value}"),
            Self::Text(text) => formatter.write_str(text.trim()),
            Self::Empty => formatter.write_str("<empty body>"),
        }
    }
}

/// Failure returned by a control-plane request.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApiFailure {
    /// The server answered with a non-success status.
    #[error("[status {status}] {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Parsed error payload.
        body: ErrorBody,
    },
    /// The request never produced a usable response (DNS, connect, timeout,
    /// or an undecodable body).
    #[error("transport error: {message}")]
    Transport {
        /// Underlying error message.
        message: String,
    },
}

impl ApiFailure {
    /// Status reported for transport failures.
    pub const TRANSPORT_STATUS: u16 = 0;

    /// Builds a transport failure from any displayable error.
    #[must_use]
    pub fn transport(err: impl fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    /// HTTP status, or [`Self::TRANSPORT_STATUS`] for transport failures.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            Self::Transport { .. } => Self::TRANSPORT_STATUS,
        }
    }

    /// Returns `true` for transport-level failures.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns `true` when the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Returns `true` when the resource already exists.
    ///
    /// The Machines API answers duplicate names with 409 or with a 422
    /// validation error mentioning the taken name.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Status { status: 409, .. } => true,
            Self::Status { status: 422, body } => {
                body.mentions("already") || body.mentions("taken")
            }
            _ => false,
        }
    }
}

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }
    };
}

newtype!(
    /// Machine identifier assigned by the platform.
    MachineId
);
newtype!(
    /// Machine state as reported by the platform (`started`, `stopped`, ...).
    MachineState
);

impl MachineState {
    /// Returns `true` when the machine is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.as_str() == "started"
    }

    /// Returns `true` when the machine needs no stop request.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self.as_str(), "stopped" | "suspended" | "destroyed")
    }
}

/// Application as returned by the platform.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct App {
    /// Application name.
    pub name: String,
    /// Platform identifier, when reported.
    #[serde(default)]
    pub id: Option<String>,
    /// Number of machines, when reported by list endpoints.
    #[serde(default)]
    pub machine_count: Option<u32>,
}

/// Volume as returned by the platform.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Volume {
    /// Volume identifier.
    pub id: String,
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Volume state (`created`, `attached`, ...).
    #[serde(default)]
    pub state: Option<String>,
    /// Size in gigabytes.
    #[serde(default)]
    pub size_gb: Option<u32>,
}

/// Machine as returned by the platform.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Machine {
    /// Machine identifier.
    pub id: MachineId,
    /// Machine name.
    #[serde(default)]
    pub name: String,
    /// Current state.
    #[serde(default)]
    pub state: MachineState,
    /// Region the machine runs in.
    #[serde(default)]
    pub region: Option<String>,
    /// Instance (release) identifier.
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Operations against the remote control plane.
pub trait ControlPlane {
    /// Fetches an application; `Ok(None)` when it does not exist.
    fn get_app<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Option<App>>;

    /// Lists every application in an organisation.
    fn list_apps<'a>(&'a self, org_slug: &'a str) -> ApiFuture<'a, Vec<App>>;

    /// Creates an application.
    fn create_app<'a>(&'a self, request: &'a AppCreate) -> ApiFuture<'a, ()>;

    /// Deletes an application together with its volumes and machines.
    fn delete_app<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, ()>;

    /// Lists the volumes of an application.
    fn list_volumes<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Vec<Volume>>;

    /// Creates a volume scoped to an application.
    fn create_volume<'a>(
        &'a self,
        app_name: &'a str,
        request: &'a VolumeCreate,
    ) -> ApiFuture<'a, Volume>;

    /// Lists the machines of an application.
    fn list_machines<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Vec<Machine>>;

    /// Creates a machine in an application.
    fn create_machine<'a>(
        &'a self,
        app_name: &'a str,
        request: &'a MachineCreate,
    ) -> ApiFuture<'a, Machine>;

    /// Starts a stopped machine.
    fn start_machine<'a>(&'a self, app_name: &'a str, machine_id: &'a MachineId)
    -> ApiFuture<'a, ()>;

    /// Stops a running machine.
    fn stop_machine<'a>(&'a self, app_name: &'a str, machine_id: &'a MachineId)
    -> ApiFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn error_body_prefers_json() {
        let body = ErrorBody::from_bytes(br#"{"error":"nope"}"#);
        assert_eq!(body, ErrorBody::Json(serde_json::json!({"error": "nope"})));
    }

    #[test]
    fn error_body_keeps_plain_text() {
        let body = ErrorBody::from_bytes(b"bad gateway");
        assert_eq!(body, ErrorBody::Text(String::from("bad gateway")));
        assert_eq!(body.to_string(), "bad gateway");
    }

    #[test]
    fn error_body_detects_empty_payloads() {
        assert_eq!(ErrorBody::from_bytes(b"  \n"), ErrorBody::Empty);
    }

    #[rstest]
    #[case(409, "", true)]
    #[case(422, r#"{"error":"Name has already been taken"}"#, true)]
    #[case(422, r#"{"error":"invalid region"}"#, false)]
    #[case(500, "already", false)]
    fn conflict_classification(#[case] status: u16, #[case] body: &str, #[case] expected: bool) {
        let failure = ApiFailure::Status {
            status,
            body: ErrorBody::from_bytes(body.as_bytes()),
        };
        assert_eq!(failure.is_conflict(), expected);
    }

    #[test]
    fn transport_failures_use_sentinel_status() {
        let failure = ApiFailure::transport("connection refused");
        assert_eq!(failure.status(), ApiFailure::TRANSPORT_STATUS);
        assert!(failure.is_transport());
        assert_eq!(failure.to_string(), "transport error: connection refused");
    }

    #[rstest]
    #[case("started", true, false)]
    #[case("stopped", false, true)]
    #[case("suspended", false, true)]
    #[case("starting", false, false)]
    fn machine_state_predicates(
        #[case] raw: &str,
        #[case] started: bool,
        #[case] stopped: bool,
    ) {
        let state = MachineState::from(raw);
        assert_eq!(state.is_started(), started);
        assert_eq!(state.is_stopped(), stopped);
    }
}
