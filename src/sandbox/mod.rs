mod backends;
pub mod demux;
pub mod sampler;
mod supervisor;
mod traits;
mod types;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(all(feature = "docker", unix))]
pub use backends::DockerBackend;

pub use demux::{demux, encode_frame, DecodeError, Demuxed};
pub use sampler::{Sampler, SamplerReport};
pub use supervisor::Supervisor;
pub use traits::ExecutionBackend;
pub use types::{
    ExecutionSpec, LogEntry, Mount, ResourceSnapshot, RunResult, SandboxHandle, StreamTag,
    WaitOutcome, Warning, WarningKind, DEFAULT_TIMEOUT,
};
