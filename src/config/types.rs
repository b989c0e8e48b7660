use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerboxConfig {
    pub execution: ExecutionConfig,
    pub docker: DockerConfig,
}

/// Defaults for the supervisor and for specs built by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout for runs that don't set one, in milliseconds
    pub default_timeout_ms: u64,
    /// Resource sampling interval in milliseconds
    pub sample_interval_ms: u64,
    /// Process limit applied by the CLI when `--pids-limit` is not given
    pub default_pids_limit: Option<i64>,
    /// Image used by the CLI when `--image` is not given
    pub default_image: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            sample_interval_ms: 100,
            default_pids_limit: None,
            default_image: "alpine".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// When to pull the image before creating a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull on every run
    Always,
    /// Pull only when the image is not present locally
    #[default]
    Missing,
    /// Never pull; a missing image fails the run
    Never,
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Path to the Docker daemon socket
    pub socket_path: PathBuf,
    /// Pin the Engine API version (e.g. "v1.43"); unversioned when unset
    pub api_version: Option<String>,
    pub pull_policy: PullPolicy,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            api_version: None,
            pull_policy: PullPolicy::default(),
        }
    }
}
