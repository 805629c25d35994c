//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default Machines API host.
pub const DEFAULT_API_HOST: &str = "api.machines.dev";

/// Fly.io settings derived from environment variables, configuration files,
/// and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FLY",
    discovery(
        app_name = "jupyfly",
        env_var = "JUPYFLY_CONFIG_PATH",
        config_file_name = "jupyfly.toml",
        dotfile_name = ".jupyfly.toml",
        project_file_name = "jupyfly.toml"
    )
)]
pub struct FlyConfig {
    /// Bearer token for the Machines API. This value is required.
    pub api_token: String,
    /// Organisation slug that owns every workspace application.
    pub organization: String,
    /// Container image running Jupyter Lab.
    pub jupyter_image: String,
    /// Domain under which workspace hostnames are published.
    #[ortho_config(default = "fly.dev".to_owned())]
    pub base_domain: String,
    /// Machines API host. A value containing `://` is treated as a full base
    /// URL, which lets tests point the client at a local server.
    #[ortho_config(default = DEFAULT_API_HOST.to_owned())]
    pub api_host: String,
    /// Prefix joined to the student identifier to form the application name.
    #[ortho_config(default = "jupyter-".to_owned())]
    pub app_prefix: String,
    /// Region used for volumes and machines.
    #[ortho_config(default = "ams".to_owned())]
    pub region: String,
    /// Port Jupyter listens on inside the machine.
    #[ortho_config(default = 8888)]
    pub internal_port: u16,
    /// Idle timeout, in seconds, forwarded to the HTTP service options.
    #[ortho_config(default = 300)]
    pub idle_timeout: u32,
    /// Size of each student's volume in gigabytes.
    #[ortho_config(default = 1)]
    pub volume_size_gb: u32,
    /// Seconds to wait after creating a volume before mounting it.
    #[ortho_config(default = 5)]
    pub volume_settle_secs: u64,
    /// Upper bound for a single control-plane request, in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// Directory holding one access record folder per student.
    #[ortho_config(default = ".fly-configs".to_owned())]
    pub records_dir: String,
    /// Maximum number of students provisioned concurrently in batch mode.
    #[ortho_config(default = 4)]
    pub batch_concurrency: usize,
    /// Delete the application when a later provisioning step fails.
    #[ortho_config(default = false)]
    pub rollback_on_failure: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl FlyConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to jupyfly.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("jupyfly")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank
    /// and [`ConfigError::Invalid`] when the application prefix is empty or a
    /// numeric setting is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_token,
            &FieldMetadata::new("Fly API token", "FLY_API_TOKEN", "api_token"),
        )?;
        Self::require_field(
            &self.organization,
            &FieldMetadata::new("Fly organisation slug", "FLY_ORGANIZATION", "organization"),
        )?;
        Self::require_field(
            &self.jupyter_image,
            &FieldMetadata::new("Jupyter image", "FLY_JUPYTER_IMAGE", "jupyter_image"),
        )?;
        Self::require_field(
            &self.base_domain,
            &FieldMetadata::new("base domain", "FLY_BASE_DOMAIN", "base_domain"),
        )?;
        Self::require_field(
            &self.api_host,
            &FieldMetadata::new("Machines API host", "FLY_API_HOST", "api_host"),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("region", "FLY_REGION", "region"),
        )?;
        Self::require_field(
            &self.records_dir,
            &FieldMetadata::new("records directory", "FLY_RECORDS_DIR", "records_dir"),
        )?;

        if self.app_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "app_prefix must not be empty",
            )));
        }
        if self.volume_size_gb == 0 {
            return Err(ConfigError::Invalid(String::from(
                "volume_size_gb must be greater than zero",
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "request_timeout_secs must be greater than zero",
            )));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Invalid(String::from(
                "batch_concurrency must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Returns the base URL requests are issued against.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        let host = self.api_host.trim().trim_end_matches('/');
        if host.contains("://") {
            host.to_owned()
        } else {
            format!("https://{host}")
        }
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the delay honoured between volume and machine creation.
    #[must_use]
    pub const fn volume_settle_delay(&self) -> Duration {
        Duration::from_secs(self.volume_settle_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when the HTTP client cannot be built from the configuration.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
