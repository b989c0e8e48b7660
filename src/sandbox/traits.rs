use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;
use crate::sandbox::types::{ExecutionSpec, ResourceSnapshot, SandboxHandle, WaitOutcome};

/// Trait for execution backends.
///
/// A backend owns the isolation mechanism (containers, microVMs, ...). The
/// supervisor only drives it through these calls, so a scripted backend can
/// stand in for a live runtime in tests.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Returns the backend name (e.g., "docker")
    fn name(&self) -> &str;

    /// Create a sandbox for `spec` without starting it.
    ///
    /// Fails with `UnitNotFound` when the image cannot be resolved and
    /// `SpecInvalid` when the backend refuses the configuration.
    async fn create_unit(&self, spec: &ExecutionSpec) -> Result<SandboxHandle>;

    /// Start the sandbox's command.
    async fn start(&self, handle: &SandboxHandle) -> Result<()>;

    /// Wait for the command to exit. Must return no later than `deadline`.
    async fn wait(&self, handle: &SandboxHandle, deadline: Instant) -> Result<WaitOutcome>;

    /// Take one resource reading. Errors are treated as transient.
    async fn snapshot_stats(&self, handle: &SandboxHandle) -> Result<ResourceSnapshot>;

    /// Fetch the multiplexed stdout/stderr stream (see [`crate::sandbox::demux`]).
    async fn fetch_raw_output(&self, handle: &SandboxHandle) -> Result<Vec<u8>>;

    /// Remove the sandbox. With `force`, a running command is killed first.
    async fn remove(&self, handle: &SandboxHandle, force: bool) -> Result<()>;
}
