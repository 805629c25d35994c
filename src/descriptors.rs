//! Request bodies sent to the Machines API.
//!
//! Descriptors are plain values: building one has no side effects and two
//! descriptors with equal fields are interchangeable. Defaults mirror the
//! platform schema the workspaces were designed against.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::FlyConfig;
use crate::workspace::{ResourceTier, WorkspaceNames};

/// Environment variable carrying the student identifier.
pub const STUDENT_ID_ENV: &str = "STUDENT_ID";
/// Environment variable carrying the Jupyter access token.
pub const JUPYTER_TOKEN_ENV: &str = "JUPYTER_TOKEN";
/// Mount point of the student's volume inside the machine.
pub const DEFAULT_MOUNT_PATH: &str = "/home/jovyan/student_data";

/// Body of `POST /v1/apps`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AppCreate {
    /// Application name.
    pub app_name: String,
    /// Organisation slug owning the application.
    pub org_slug: String,
}

impl AppCreate {
    /// Describes the application backing a workspace.
    #[must_use]
    pub fn for_workspace(config: &FlyConfig, names: &WorkspaceNames) -> Self {
        Self {
            app_name: names.app_name.clone(),
            org_slug: config.organization.trim().to_owned(),
        }
    }
}

/// Body of `POST /v1/apps/{app}/volumes`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeCreate {
    /// Volume name.
    pub name: String,
    /// Region to create the volume in.
    pub region: String,
    /// Size in gigabytes.
    pub size_gb: u32,
    /// Whether the volume is encrypted at rest.
    pub encrypted: bool,
}

impl VolumeCreate {
    /// Describes the notebook volume of a workspace.
    #[must_use]
    pub fn for_workspace(config: &FlyConfig, names: &WorkspaceNames) -> Self {
        Self {
            name: names.volume_name.clone(),
            region: config.region.clone(),
            size_gb: config.volume_size_gb,
            encrypted: true,
        }
    }
}

/// Volume mount inside a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MachineMount {
    /// Identifier of the volume to mount.
    pub volume: String,
    /// Mount point.
    pub path: String,
    /// Whether the volume is encrypted.
    pub encrypted: bool,
}

impl MachineMount {
    /// Mounts `volume_id` at [`DEFAULT_MOUNT_PATH`].
    #[must_use]
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume: volume_id.into(),
            path: String::from(DEFAULT_MOUNT_PATH),
            encrypted: true,
        }
    }
}

/// Connection limits applied to a service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Concurrency {
    /// Limit kind (`connections` or `requests`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Load above which the proxy prefers other machines.
    pub soft_limit: u32,
    /// Load above which new connections are refused.
    pub hard_limit: u32,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            kind: String::from("connections"),
            soft_limit: 20,
            hard_limit: 30,
        }
    }
}

/// Public port exposed by a service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServicePort {
    /// External port.
    pub port: u16,
    /// Protocol handlers applied at the edge.
    pub handlers: Vec<String>,
    /// Redirect plain HTTP to HTTPS.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force_https: bool,
}

/// HTTP-level options of a service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HttpOptions {
    /// Idle timeout in seconds.
    pub idle_timeout: u32,
    /// Speak HTTP/2 to the machine.
    pub h2_backend: bool,
}

/// What the proxy does with an idle machine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoStop {
    /// Never stop automatically.
    #[default]
    Off,
    /// Stop idle machines.
    Stop,
    /// Suspend idle machines.
    Suspend,
}

/// Exposed HTTP service of a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MachineService {
    /// Transport protocol.
    pub protocol: String,
    /// Port the application listens on inside the machine.
    pub internal_port: u16,
    /// Public ports.
    pub ports: Vec<ServicePort>,
    /// Connection limits.
    pub concurrency: Concurrency,
    /// HTTP options.
    pub http_options: HttpOptions,
    /// Start stopped machines on incoming traffic.
    pub autostart: bool,
    /// Idle behaviour.
    pub autostop: AutoStop,
    /// Machines kept running regardless of traffic.
    pub min_machines_running: u32,
}

impl MachineService {
    /// Builds the Jupyter HTTP service for `internal_port`.
    #[must_use]
    pub fn http(internal_port: u16, idle_timeout: u32) -> Self {
        Self {
            protocol: String::from("tcp"),
            internal_port,
            ports: vec![
                ServicePort {
                    port: 80,
                    handlers: vec![String::from("http")],
                    force_https: true,
                },
                ServicePort {
                    port: 443,
                    handlers: vec![String::from("tls"), String::from("http")],
                    force_https: false,
                },
            ],
            concurrency: Concurrency::default(),
            http_options: HttpOptions {
                idle_timeout,
                h2_backend: true,
            },
            autostart: true,
            autostop: AutoStop::Off,
            min_machines_running: 0,
        }
    }
}

/// CPU and memory of a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Guest {
    /// CPU class.
    pub cpu_kind: String,
    /// Number of CPUs.
    pub cpus: u32,
    /// Memory in megabytes.
    pub memory_mb: u32,
}

impl From<ResourceTier> for Guest {
    fn from(tier: ResourceTier) -> Self {
        Self {
            cpu_kind: String::from("shared"),
            cpus: tier.cpus(),
            memory_mb: tier.memory_mb(),
        }
    }
}

/// Init options of a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MachineInit {
    /// Swap file size in megabytes.
    pub swap_size_mb: u32,
}

/// Restart policy of a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RestartPolicy {
    /// Policy name.
    pub policy: String,
    /// Retries before giving up.
    pub max_retries: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            policy: String::from("on-failure"),
            max_retries: 3,
        }
    }
}

/// Desired configuration of a workspace machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MachineConfig {
    /// Image reference.
    pub image: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Exposed services.
    pub services: Vec<MachineService>,
    /// Volume mounts.
    pub mounts: Vec<MachineMount>,
    /// CPU and memory.
    pub guest: Guest,
    /// Init options.
    pub init: MachineInit,
    /// Restart policy.
    pub restart: RestartPolicy,
    /// Destroy the machine once it exits.
    pub auto_destroy: bool,
}

/// Body of `POST /v1/apps/{app}/machines`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MachineCreate {
    /// Machine name.
    pub name: String,
    /// Region to run in.
    pub region: String,
    /// Machine configuration.
    pub config: MachineConfig,
}

/// Inputs that vary per machine creation.
#[derive(Clone, Copy, Debug)]
pub struct MachineInputs<'a> {
    /// Identifier of the volume to mount.
    pub volume_id: &'a str,
    /// Access token exposed to Jupyter.
    pub access_token: &'a str,
    /// Resource tier.
    pub tier: ResourceTier,
}

impl MachineCreate {
    /// Describes the Jupyter machine of a workspace.
    #[must_use]
    pub fn for_workspace(
        config: &FlyConfig,
        names: &WorkspaceNames,
        inputs: MachineInputs<'_>,
    ) -> Self {
        let env = BTreeMap::from([
            (
                String::from(STUDENT_ID_ENV),
                names.student_id.as_str().to_owned(),
            ),
            (
                String::from(JUPYTER_TOKEN_ENV),
                inputs.access_token.to_owned(),
            ),
        ]);

        Self {
            name: names.app_name.clone(),
            region: config.region.clone(),
            config: MachineConfig {
                image: config.jupyter_image.clone(),
                env,
                services: vec![MachineService::http(
                    config.internal_port,
                    config.idle_timeout,
                )],
                mounts: vec![MachineMount::new(inputs.volume_id)],
                guest: Guest::from(inputs.tier),
                init: MachineInit { swap_size_mb: 512 },
                restart: RestartPolicy::default(),
                auto_destroy: true,
            },
        }
    }

    /// Returns the access token embedded in the environment, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.config.env.get(JUPYTER_TOKEN_ENV).map(String::as_str)
    }
}
