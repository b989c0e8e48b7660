//! Deterministic backend for exercising the supervisor without a container runtime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{DockerboxError, Result};
use crate::sandbox::demux::encode_frame;
use crate::sandbox::traits::ExecutionBackend;
use crate::sandbox::types::{ExecutionSpec, ResourceSnapshot, SandboxHandle, StreamTag, WaitOutcome};

/// How the scripted command behaves once started.
pub enum Exit {
    /// Exits with `status_code` after `after`
    After { after: Duration, status_code: i64 },
    /// Never exits; the wait only returns at the deadline
    Never,
    /// Ignores the deadline and hangs, so only the supervisor's own bound applies
    Hang,
    /// The wait call itself fails
    Fail(fn() -> DockerboxError),
}

pub struct ScriptedBackend {
    create_error: Mutex<Option<DockerboxError>>,
    start_error: Mutex<Option<DockerboxError>>,
    exit: Exit,
    stats: Mutex<VecDeque<Result<ResourceSnapshot>>>,
    last_stats: Mutex<Option<ResourceSnapshot>>,
    output: Mutex<Option<Result<Vec<u8>>>>,
    remove_error: Mutex<Option<DockerboxError>>,
    calls: Mutex<Vec<&'static str>>,
    events: Mutex<Vec<&'static str>>,
    created: AtomicUsize,
    stats_calls: AtomicUsize,
    removals: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            create_error: Mutex::new(None),
            start_error: Mutex::new(None),
            exit: Exit::After {
                after: Duration::ZERO,
                status_code: 0,
            },
            stats: Mutex::new(VecDeque::new()),
            last_stats: Mutex::new(None),
            output: Mutex::new(Some(Ok(Vec::new()))),
            remove_error: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
            removals: AtomicUsize::new(0),
        }
    }

    pub fn with_create_error(self, error: DockerboxError) -> Self {
        *self.create_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_start_error(self, error: DockerboxError) -> Self {
        *self.start_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_exit(mut self, exit: Exit) -> Self {
        self.exit = exit;
        self
    }

    /// Snapshots returned in order; the last successful one repeats afterwards.
    pub fn with_stats(self, stats: Vec<Result<ResourceSnapshot>>) -> Self {
        *self.stats.lock().unwrap() = stats.into();
        self
    }

    pub fn with_frames(self, frames: &[(StreamTag, &str)]) -> Self {
        let mut raw = Vec::new();
        for (stream, text) in frames {
            encode_frame(*stream, text.as_bytes(), &mut raw);
        }
        self.with_raw_output(raw)
    }

    pub fn with_raw_output(self, raw: Vec<u8>) -> Self {
        *self.output.lock().unwrap() = Some(Ok(raw));
        self
    }

    pub fn with_output_error(self, error: DockerboxError) -> Self {
        *self.output.lock().unwrap() = Some(Err(error));
        self
    }

    pub fn with_remove_error(self, error: DockerboxError) -> Self {
        *self.remove_error.lock().unwrap() = Some(error);
        self
    }

    /// Lifecycle calls in the order they were made (stats polling excluded).
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Every backend call in order, stats polls included.
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
        self.events.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_unit(&self, _spec: &ExecutionSpec) -> Result<SandboxHandle> {
        self.record("create");
        if let Some(error) = self.create_error.lock().unwrap().take() {
            return Err(error);
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxHandle::new(format!("scripted-{}", n)))
    }

    async fn start(&self, _handle: &SandboxHandle) -> Result<()> {
        self.record("start");
        match self.start_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn wait(&self, _handle: &SandboxHandle, deadline: Instant) -> Result<WaitOutcome> {
        self.record("wait");
        match &self.exit {
            Exit::After { after, status_code } => {
                let exits_at = Instant::now() + *after;
                if exits_at > deadline {
                    tokio::time::sleep_until(deadline).await;
                    Ok(WaitOutcome::DeadlineExceeded)
                } else {
                    tokio::time::sleep_until(exits_at).await;
                    Ok(WaitOutcome::Completed {
                        status_code: *status_code,
                    })
                }
            }
            Exit::Never => {
                tokio::time::sleep_until(deadline).await;
                Ok(WaitOutcome::DeadlineExceeded)
            }
            Exit::Hang => std::future::pending().await,
            Exit::Fail(make) => Err(make()),
        }
    }

    async fn snapshot_stats(&self, _handle: &SandboxHandle) -> Result<ResourceSnapshot> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push("stats");
        let next = self.stats.lock().unwrap().pop_front();
        let mut last = self.last_stats.lock().unwrap();
        match next {
            Some(Ok(sample)) => {
                *last = Some(sample);
                Ok(sample)
            }
            Some(Err(error)) => Err(error),
            None => Ok(last.unwrap_or_default()),
        }
    }

    async fn fetch_raw_output(&self, _handle: &SandboxHandle) -> Result<Vec<u8>> {
        self.record("logs");
        match self.output.lock().unwrap().take() {
            Some(output) => output,
            None => Ok(Vec::new()),
        }
    }

    async fn remove(&self, _handle: &SandboxHandle, force: bool) -> Result<()> {
        assert!(force, "teardown must force removal");
        self.record("remove");
        self.removals.fetch_add(1, Ordering::SeqCst);
        match self.remove_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
