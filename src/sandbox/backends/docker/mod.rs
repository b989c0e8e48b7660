mod api;

use std::path::Path;

use async_trait::async_trait;
use hyper::StatusCode;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::types::{DockerConfig, PullPolicy};
use crate::error::{DockerboxError, Result};
use crate::sandbox::traits::ExecutionBackend;
use crate::sandbox::types::{ExecutionSpec, ResourceSnapshot, SandboxHandle, WaitOutcome};

use self::api::{
    CreateContainer, CreatedContainer, DockerApiClient, HostConfig, StatsResponse, WaitResponse,
};

/// Docker sandbox backend.
///
/// Talks to the Docker Engine API over the daemon's unix socket. Each
/// sandbox is one container, created stopped and removed with `force` on
/// teardown.
pub struct DockerBackend {
    api: DockerApiClient,
    pull_policy: PullPolicy,
}

impl DockerBackend {
    /// Connect to the daemon and verify it answers.
    pub async fn connect(config: &DockerConfig) -> Result<Self> {
        let api = DockerApiClient::new(&config.socket_path, config.api_version.as_deref());

        let backend = Self {
            api,
            pull_policy: config.pull_policy,
        };
        backend.ping().await?;

        info!(
            socket = %config.socket_path.display(),
            pull_policy = ?config.pull_policy,
            "Docker backend initialized"
        );
        Ok(backend)
    }

    /// Check that the daemon is reachable.
    pub async fn ping(&self) -> Result<()> {
        let unavailable = |reason: String| DockerboxError::BackendNotAvailable {
            backend: "docker".to_string(),
            reason,
        };

        if !self.api.socket_path().exists() {
            return Err(unavailable(format!(
                "socket {} does not exist. Ensure Docker is installed and running.",
                self.api.socket_path().display()
            )));
        }

        let response = self
            .api
            .get("/_ping")
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.status.is_success() {
            return Err(unavailable(format!(
                "ping returned {}: {}",
                response.status,
                response.message()
            )));
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        self.api.socket_path()
    }

    /// Make sure `image` is available locally, pulling it per the pull policy.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        let pull = match self.pull_policy {
            PullPolicy::Never => false,
            PullPolicy::Always => true,
            PullPolicy::Missing => !self.image_exists(image).await?,
        };
        if pull {
            self.pull_image(image).await?;
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let response = self.api.get(&format!("/images/{}/json", image)).await?;
        match response.status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.into_error()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");

        let (name, tag) = split_reference(image);
        let path = format!("/images/create?fromImage={}&tag={}", name, tag);
        let response = self.api.post::<()>(&path, None).await?;

        match response.status {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                debug!(image = %image, error = %response.message(), "Image pull refused");
                return Err(DockerboxError::UnitNotFound {
                    reference: image.to_string(),
                });
            }
            StatusCode::BAD_REQUEST => {
                return Err(DockerboxError::SpecInvalid(response.message()));
            }
            _ => return Err(response.into_error()),
        }

        // The daemon streams progress as JSON lines and reports failures
        // in-band with a 200 status.
        if let Some(message) = stream_error(&response.body) {
            return Err(DockerboxError::UnitNotFound {
                reference: format!("{} ({})", image, message),
            });
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

/// Split `name[:tag]` or `name@digest`; the tag defaults to `latest`.
fn split_reference(image: &str) -> (&str, &str) {
    if let Some((name, digest)) = image.split_once('@') {
        return (name, digest);
    }
    // A colon before the last slash belongs to a registry port.
    match image.rfind(':') {
        Some(i) if !image[i..].contains('/') => (&image[..i], &image[i + 1..]),
        _ => (image, "latest"),
    }
}

/// First `error` field in a JSON-lines progress stream.
fn stream_error(body: &[u8]) -> Option<String> {
    body.split(|b| *b == b'\n')
        .filter_map(|line| serde_json::from_slice::<serde_json::Value>(line).ok())
        .find_map(|value| value.get("error")?.as_str().map(str::to_string))
}

fn create_body(spec: &ExecutionSpec) -> CreateContainer {
    CreateContainer {
        image: spec.image.clone(),
        cmd: spec.command.clone(),
        env: spec
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect(),
        working_dir: spec.workdir.clone(),
        attach_stdin: false,
        attach_stdout: true,
        attach_stderr: true,
        tty: false,
        open_stdin: false,
        host_config: HostConfig {
            pids_limit: spec.pids_limit,
            binds: spec.mounts.iter().map(|m| m.to_bind()).collect(),
        },
    }
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create_unit(&self, spec: &ExecutionSpec) -> Result<SandboxHandle> {
        self.ensure_image(&spec.image).await?;

        let response = self
            .api
            .post("/containers/create", Some(&create_body(spec)))
            .await?;

        match response.status {
            StatusCode::CREATED | StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                debug!(image = %spec.image, error = %response.message(), "Create refused");
                return Err(DockerboxError::UnitNotFound {
                    reference: spec.image.clone(),
                });
            }
            StatusCode::BAD_REQUEST => return Err(DockerboxError::SpecInvalid(response.message())),
            _ => return Err(response.into_error()),
        }

        let created: CreatedContainer = response.json()?;
        for warning in created.warnings.unwrap_or_default() {
            warn!(container_id = %created.id, warning = %warning, "Docker create warning");
        }

        debug!(container_id = %created.id, "Container created");
        Ok(SandboxHandle::new(created.id))
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<()> {
        let response = self
            .api
            .post::<()>(&format!("/containers/{}/start", handle.id()), None)
            .await?;

        // 304: already started
        if response.status.is_success() || response.status == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }

    async fn wait(&self, handle: &SandboxHandle, deadline: Instant) -> Result<WaitOutcome> {
        let path = format!("/containers/{}/wait?condition=not-running", handle.id());

        // Dropping the request future at the deadline closes the connection,
        // which is how the daemon learns the waiter is gone.
        let response = match tokio::time::timeout_at(deadline, self.api.post::<()>(&path, None)).await {
            Ok(response) => response?,
            Err(_) => return Ok(WaitOutcome::DeadlineExceeded),
        };

        if !response.status.is_success() {
            return Err(response.into_error());
        }

        let waited: WaitResponse = response.json()?;
        if let Some(err) = waited.error.filter(|e| !e.message.is_empty()) {
            return Err(DockerboxError::api(
                format!("wait failed: {}", err.message),
                Some(response.status.as_u16()),
            ));
        }

        Ok(WaitOutcome::Completed {
            status_code: waited.status_code,
        })
    }

    async fn snapshot_stats(&self, handle: &SandboxHandle) -> Result<ResourceSnapshot> {
        let response = self
            .api
            .get(&format!(
                "/containers/{}/stats?stream=false&one-shot=true",
                handle.id()
            ))
            .await?;

        if !response.status.is_success() {
            return Err(response.into_error());
        }

        let stats: StatsResponse = response.json()?;
        Ok(ResourceSnapshot {
            cpu_time_nanos: stats.cpu_stats.cpu_usage.total_usage,
            memory_bytes: stats.memory_stats.usage,
        })
    }

    async fn fetch_raw_output(&self, handle: &SandboxHandle) -> Result<Vec<u8>> {
        let response = self
            .api
            .get(&format!("/containers/{}/logs?stdout=1&stderr=1", handle.id()))
            .await?;

        if !response.status.is_success() {
            return Err(response.into_error());
        }
        Ok(response.body.to_vec())
    }

    async fn remove(&self, handle: &SandboxHandle, force: bool) -> Result<()> {
        let response = self
            .api
            .delete(&format!("/containers/{}?force={}", handle.id(), force))
            .await?;

        if response.status.is_success() {
            debug!(container_id = %handle, "Container removed");
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}
