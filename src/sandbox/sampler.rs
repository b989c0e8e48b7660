use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::sandbox::traits::ExecutionBackend;
use crate::sandbox::types::{ResourceSnapshot, SandboxHandle, Warning, WarningKind};

/// Polling interval used unless configured otherwise.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// What the sampler hands back when stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerReport {
    /// Running maxima over every successful snapshot
    pub peak: ResourceSnapshot,
    /// Number of snapshots taken, failed ones included
    pub samples: u32,
    pub failures: u32,
    pub first_error: Option<String>,
    /// Time from `start` to the stop request
    pub elapsed: Duration,
}

impl SamplerReport {
    /// Snapshot failures folded into one warning, if there were any.
    pub fn warning(&self) -> Option<Warning> {
        let first = self.first_error.as_ref()?;
        Some(Warning::new(
            WarningKind::Sampling,
            format!(
                "{} of {} stats snapshots failed; first error: {}",
                self.failures, self.samples, first
            ),
        ))
    }
}

/// Background task polling a backend for resource usage.
///
/// Dropping a `Sampler` without calling [`Sampler::stop`] aborts the task.
pub struct Sampler {
    started: Instant,
    stop_tx: Option<oneshot::Sender<()>>,
    report_rx: Option<oneshot::Receiver<SamplerReport>>,
    task: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Spawn the sampling task.
    ///
    /// Returns once the task is running and its first snapshot is under way,
    /// so a sandbox started afterwards is observed from the beginning.
    pub async fn start(
        backend: Arc<dyn ExecutionBackend>,
        handle: SandboxHandle,
        interval: Duration,
    ) -> Self {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (report_tx, report_rx) = oneshot::channel();
        let started = Instant::now();
        debug!(sandbox = %handle, interval_ms = interval.as_millis() as u64, "Resource sampler started");

        let task = tokio::spawn(async move {
            let report =
                sample_until_stopped(backend.as_ref(), &handle, interval, ready_tx, stop_rx).await;
            // The receiver only disappears if the supervisor was dropped mid-run.
            let _ = report_tx.send(report);
        });

        // Only fails if the task panicked; `stop` then reports an empty result.
        let _ = ready_rx.await;

        Self {
            started,
            stop_tx: Some(stop_tx),
            report_rx: Some(report_rx),
            task: Some(task),
        }
    }

    /// Ask the task to stop and wait for its final report.
    ///
    /// When this returns the task has exited and no further backend calls
    /// will be made on the sampler's behalf.
    pub async fn stop(mut self) -> SamplerReport {
        let requested_at = self.started.elapsed();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let report = match self.report_rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        };
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        let mut report = report.unwrap_or_default();
        report.elapsed = requested_at;
        debug!(
            samples = report.samples,
            failures = report.failures,
            cpu_time_nanos = report.peak.cpu_time_nanos,
            memory_bytes = report.peak.memory_bytes,
            "Resource sampler stopped"
        );
        report
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn sample_until_stopped(
    backend: &dyn ExecutionBackend,
    handle: &SandboxHandle,
    interval: Duration,
    ready_tx: oneshot::Sender<()>,
    mut stop_rx: oneshot::Receiver<()>,
) -> SamplerReport {
    let mut report = SamplerReport::default();
    let mut ready_tx = Some(ready_tx);

    loop {
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(());
        }
        report.samples += 1;
        match backend.snapshot_stats(handle).await {
            Ok(sample) => {
                trace!(
                    cpu_time_nanos = sample.cpu_time_nanos,
                    memory_bytes = sample.memory_bytes,
                    "Stats snapshot"
                );
                report.peak.absorb(sample);
            }
            Err(e) => {
                trace!(error = %e, "Stats snapshot failed");
                report.failures += 1;
                if report.first_error.is_none() {
                    report.first_error = Some(e.to_string());
                }
            }
        }

        // A stop request wins over the next sample; a dropped sender counts as one.
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    report
}
