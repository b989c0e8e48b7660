use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::types::DockerboxConfig;
use crate::error::{DockerboxError, Result};
use crate::sandbox::demux::demux;
use crate::sandbox::sampler::{Sampler, SamplerReport, DEFAULT_SAMPLE_INTERVAL};
use crate::sandbox::traits::ExecutionBackend;
use crate::sandbox::types::{
    ExecutionSpec, RunResult, SandboxHandle, WaitOutcome, Warning, WarningKind, DEFAULT_TIMEOUT,
};

/// Drives one execution end to end: provision, run, teardown.
///
/// Every call to [`Supervisor::execute`] creates its own sandbox and removes it
/// before returning, whatever happened in between.
pub struct Supervisor {
    backend: Arc<dyn ExecutionBackend>,
    sample_interval: Duration,
    default_timeout: Duration,
}

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What `run` hands to teardown and aggregation.
struct Execution {
    waited: Result<WaitOutcome>,
    report: SamplerReport,
    raw_output: Result<Vec<u8>>,
}

impl Supervisor {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Supervisor with the intervals and defaults from `config`.
    pub fn from_config(backend: Arc<dyn ExecutionBackend>, config: &DockerboxConfig) -> Self {
        Self::new(backend)
            .with_sample_interval(config.execution.sample_interval())
            .with_default_timeout(config.execution.default_timeout())
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Timeout for specs that don't carry their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run `spec` to completion or deadline and collect its result.
    ///
    /// Errors mean no usable result exists: the execution spec was rejected,
    /// the sandbox could not be created, or it could not be started. Anything
    /// that goes wrong once the command is running, including a failed wait,
    /// is reported in [`RunResult::warnings`] instead.
    pub async fn execute(&self, spec: ExecutionSpec) -> Result<RunResult> {
        spec.validate()?;
        let timeout = spec.timeout.unwrap_or(self.default_timeout);

        let handle = self.provision(&spec).await?;
        let run = self.run(&handle, timeout).await;
        let teardown_warning = self.teardown(handle).await;

        let execution = match run {
            Ok(execution) => execution,
            Err(e) => {
                if let Some(w) = teardown_warning {
                    warn!(warning = %w, "Teardown failed after run failure");
                }
                return Err(e);
            }
        };

        Ok(aggregate(execution, teardown_warning))
    }

    /// Create the sandbox. No handle exists if this fails, so nothing to tear down.
    async fn provision(&self, spec: &ExecutionSpec) -> Result<SandboxHandle> {
        debug!(backend = %self.backend.name(), image = %spec.image, "Provisioning sandbox");

        let handle = self.backend.create_unit(spec).await.map_err(|e| match e {
            DockerboxError::SpecInvalid(_)
            | DockerboxError::UnitNotFound { .. }
            | DockerboxError::BackendNotAvailable { .. }
            | DockerboxError::CreateFailed { .. } => e,
            other => DockerboxError::CreateFailed {
                source: Box::new(other),
            },
        })?;

        info!(sandbox = %handle, image = %spec.image, "Sandbox created");
        Ok(handle)
    }

    /// Start the command and wait for it under `timeout`, sampling resources
    /// the whole time. Raw output is fetched here, while the sandbox still exists.
    async fn run(&self, handle: &SandboxHandle, timeout: Duration) -> Result<Execution> {
        let sampler =
            Sampler::start(self.backend.clone(), handle.share(), self.sample_interval).await;

        let deadline = deadline_after(timeout);
        if let Err(e) = self.backend.start(handle).await {
            sampler.stop().await;
            return Err(DockerboxError::RunFailed {
                source: Box::new(e),
            });
        }
        debug!(sandbox = %handle, timeout_ms = timeout.as_millis() as u64, "Sandbox started");

        let waited = self.wait_until(handle, deadline).await;
        let report = sampler.stop().await;

        match &waited {
            Ok(WaitOutcome::Completed { status_code }) => {
                info!(sandbox = %handle, status_code, elapsed_ms = report.elapsed.as_millis() as u64, "Sandbox exited")
            }
            Ok(WaitOutcome::DeadlineExceeded) => {
                info!(sandbox = %handle, timeout_ms = timeout.as_millis() as u64, "Sandbox hit its deadline")
            }
            Err(e) => warn!(sandbox = %handle, error = %e, "Wait failed, collecting partial result"),
        }

        let raw_output = self.backend.fetch_raw_output(handle).await;
        Ok(Execution {
            waited,
            report,
            raw_output,
        })
    }

    /// The backend's wait, bounded by `deadline` even if the backend overruns it.
    async fn wait_until(&self, handle: &SandboxHandle, deadline: Instant) -> Result<WaitOutcome> {
        match tokio::time::timeout_at(deadline, self.backend.wait(handle, deadline)).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(WaitOutcome::DeadlineExceeded),
        }
    }

    /// Force-remove the sandbox. Consumes the handle so this happens once.
    async fn teardown(&self, handle: SandboxHandle) -> Option<Warning> {
        match self.backend.remove(&handle, true).await {
            Ok(()) => {
                debug!(sandbox = %handle, "Sandbox removed");
                None
            }
            Err(e) => {
                debug!(sandbox = %handle, error = %e, "Sandbox removal failed");
                Some(Warning::new(
                    WarningKind::Teardown,
                    format!("failed to remove sandbox {}: {}", handle, e),
                ))
            }
        }
    }
}

/// `now + timeout`, saturating at a far-future instant.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn aggregate(execution: Execution, teardown_warning: Option<Warning>) -> RunResult {
    let Execution {
        waited,
        report,
        raw_output,
    } = execution;

    let mut warnings: Vec<Warning> = report.warning().into_iter().collect();

    let (timed_out, status_code) = match waited {
        Ok(WaitOutcome::Completed { status_code }) => (false, Some(status_code)),
        Ok(WaitOutcome::DeadlineExceeded) => (true, None),
        Err(e) => {
            warnings.push(Warning::new(WarningKind::Wait, e.to_string()));
            (false, None)
        }
    };

    let logs = match raw_output {
        Ok(raw) => {
            let decoded = demux(&raw);
            if let Some(e) = decoded.error {
                warnings.push(Warning::new(WarningKind::LogDecode, e.to_string()));
            }
            decoded.entries
        }
        Err(e) => {
            warnings.push(Warning::new(WarningKind::LogFetch, e.to_string()));
            Vec::new()
        }
    };

    warnings.extend(teardown_warning);

    RunResult {
        timed_out,
        cpu_time_nanos: report.peak.cpu_time_nanos,
        memory_bytes: report.peak.memory_bytes,
        elapsed_millis: report.elapsed.as_millis() as u64,
        logs,
        status_code,
        warnings,
    }
}
