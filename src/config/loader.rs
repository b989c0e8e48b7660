use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::DockerboxConfig;
use crate::error::{DockerboxError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "dockerbox", "dockerbox") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".dockerbox").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<DockerboxConfig> {
    load_config_with(config_path, std::env::var("DOCKER_HOST").ok().as_deref())
}

fn load_config_with(config_path: Option<&Path>, docker_host: Option<&str>) -> Result<DockerboxConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        parse_config(&content)?
    } else {
        // Return defaults if no config file exists
        DockerboxConfig::default()
    };

    apply_docker_host(&mut config, docker_host)?;
    validate(&config)?;

    debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<DockerboxConfig> {
    toml::from_str(content).map_err(|e| DockerboxError::TomlParse(e.to_string()))
}

/// Honour `DOCKER_HOST=unix://...` the way the docker CLI does.
fn apply_docker_host(config: &mut DockerboxConfig, docker_host: Option<&str>) -> Result<()> {
    let Some(host) = docker_host.filter(|h| !h.is_empty()) else {
        return Ok(());
    };

    match host.strip_prefix("unix://") {
        Some(path) => {
            config.docker.socket_path = PathBuf::from(path);
            Ok(())
        }
        None => Err(DockerboxError::Config(format!(
            "DOCKER_HOST '{}' is not supported; only unix:// sockets are",
            host
        ))),
    }
}

fn validate(config: &DockerboxConfig) -> Result<()> {
    if config.execution.sample_interval_ms == 0 {
        return Err(DockerboxError::Config(
            "execution.sample_interval_ms must be greater than zero".to_string(),
        ));
    }
    if config.execution.default_timeout_ms == 0 {
        return Err(DockerboxError::Config(
            "execution.default_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Render the default configuration as TOML, for `dockerbox init`.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&DockerboxConfig::default())
        .map_err(|e| DockerboxError::Config(format!("Failed to serialize config: {}", e)))
}
