#[cfg(all(feature = "docker", unix))]
mod docker;

#[cfg(all(feature = "docker", unix))]
pub use docker::DockerBackend;
