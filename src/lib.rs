#[cfg(all(feature = "docker", unix))]
pub mod cli;
pub mod config;
pub mod error;
pub mod sandbox;

pub use error::{DockerboxError, Result};
pub use sandbox::{ExecutionSpec, RunResult, Supervisor};
