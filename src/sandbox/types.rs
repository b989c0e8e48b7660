use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{DockerboxError, Result};

/// Timeout applied when neither the `ExecutionSpec` nor the configuration sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A bind mount from the host into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub guest_path: String,
    pub readonly: bool,
}

impl Mount {
    /// Docker bind notation: `host:guest[:ro]`.
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.guest_path);
        if self.readonly {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Everything needed to run one command in one disposable sandbox.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSpec {
    /// Image (or other template) the sandbox is created from
    pub image: String,
    /// Command and arguments; empty means the image default
    pub command: Vec<String>,
    /// Environment variables, in order
    pub env: Vec<(String, String)>,
    /// Maximum number of processes inside the sandbox
    pub pids_limit: Option<i64>,
    pub mounts: Vec<Mount>,
    pub workdir: Option<String>,
    /// Wall-clock budget; the supervisor default applies when unset
    pub timeout: Option<Duration>,
}

impl ExecutionSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_pids_limit(mut self, limit: i64) -> Self {
        self.pids_limit = Some(limit);
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reject specs no backend could turn into a runnable sandbox.
    pub fn validate(&self) -> Result<()> {
        let image = self.image.trim();
        if image.is_empty() {
            return Err(invalid("image reference is empty"));
        }
        if let Some(c) = image.chars().find(|c| !is_reference_char(*c)) {
            return Err(invalid(format!(
                "image reference '{}' contains invalid character {:?}",
                self.image, c
            )));
        }

        for (key, _) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(invalid(format!("invalid environment variable name '{}'", key)));
            }
        }

        if let Some(limit) = self.pids_limit {
            if limit <= 0 {
                return Err(invalid(format!("process limit must be positive, got {}", limit)));
            }
        }

        for mount in &self.mounts {
            if !mount.guest_path.starts_with('/') {
                return Err(invalid(format!(
                    "mount target '{}' must be an absolute path",
                    mount.guest_path
                )));
            }
            if mount.host_path.as_os_str().is_empty() {
                return Err(invalid("mount source is empty"));
            }
        }

        if let Some(dir) = &self.workdir {
            if !dir.starts_with('/') {
                return Err(invalid(format!("working directory '{}' must be absolute", dir)));
            }
        }

        if self.timeout == Some(Duration::ZERO) {
            return Err(invalid("timeout must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> DockerboxError {
    DockerboxError::SpecInvalid(reason.into())
}

fn is_reference_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@')
}

/// Backend-assigned identity of one provisioned sandbox.
///
/// Not `Clone`: the supervisor owns it and hands it to `teardown` by value,
/// so removal is requested at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct SandboxHandle {
    id: String,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read-only view for the sampler task. Only valid until teardown.
    pub(crate) fn share(&self) -> SandboxHandle {
        SandboxHandle {
            id: self.id.clone(),
        }
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed { status_code: i64 },
    DeadlineExceeded,
}

/// Point-in-time resource reading, also used for running maxima.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_time_nanos: u64,
    pub memory_bytes: u64,
}

impl ResourceSnapshot {
    /// Fold a new sample into the running maxima.
    pub fn absorb(&mut self, sample: ResourceSnapshot) {
        self.cpu_time_nanos = self.cpu_time_nanos.max(sample.cpu_time_nanos);
        self.memory_bytes = self.memory_bytes.max(sample.memory_bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl StreamTag {
    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

/// One frame of output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub stream: StreamTag,
    #[serde(rename = "log", serialize_with = "serialize_lossy")]
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(stream: StreamTag, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

fn serialize_lossy<S: Serializer>(payload: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Sampling,
    Wait,
    LogFetch,
    LogDecode,
    Teardown,
}

/// A non-fatal problem recorded alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.kind {
            WarningKind::Sampling => "resource sampling",
            WarningKind::Wait => "wait",
            WarningKind::LogFetch => "log fetch",
            WarningKind::LogDecode => "log decode",
            WarningKind::Teardown => "teardown",
        };
        write!(f, "{}: {}", stage, self.message)
    }
}

/// Outcome of one `execute` call.
///
/// Check `timed_out` before reading `status_code`: a run that hit its deadline
/// has no status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub timed_out: bool,
    /// Peak cumulative CPU time, nanoseconds
    pub cpu_time_nanos: u64,
    /// Peak memory usage, bytes
    pub memory_bytes: u64,
    /// Wall time from sampler start to sampler stop
    pub elapsed_millis: u64,
    pub logs: Vec<LogEntry>,
    pub status_code: Option<i64>,
    pub warnings: Vec<Warning>,
}

impl RunResult {
    /// Concatenated payloads of one stream.
    pub fn output(&self, stream: StreamTag) -> Vec<u8> {
        self.logs
            .iter()
            .filter(|entry| entry.stream == stream)
            .flat_map(|entry| entry.payload.iter().copied())
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }
}
