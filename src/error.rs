use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerboxError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Provisioning errors
    #[error("Invalid execution spec: {0}")]
    SpecInvalid(String),

    #[error("Unit not found: {reference}")]
    UnitNotFound { reference: String },

    #[error("Backend '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Failed to create sandbox: {source}")]
    CreateFailed {
        #[source]
        source: Box<DockerboxError>,
    },

    // Run errors
    #[error("Sandbox run failed: {source}")]
    RunFailed {
        #[source]
        source: Box<DockerboxError>,
    },

    // Backend errors
    #[error("Backend API error: {message}")]
    BackendApi {
        message: String,
        status: Option<u16>,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DockerboxError {
    pub fn api(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::BackendApi {
            message: message.into(),
            status,
        }
    }

    /// Whether repeating the same `execute` call may succeed.
    ///
    /// Nothing inside the supervisor retries; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackendNotAvailable { .. } => true,
            Self::BackendApi { status, .. } => status.map_or(true, |s| s >= 500),
            Self::CreateFailed { source } | Self::RunFailed { source } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DockerboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(DockerboxError::api("boom", Some(500)).is_retryable());
        assert!(DockerboxError::api("socket closed", None).is_retryable());
        assert!(!DockerboxError::api("bad request", Some(400)).is_retryable());
        assert!(!DockerboxError::SpecInvalid("empty image".to_string()).is_retryable());

        let wrapped = DockerboxError::CreateFailed {
            source: Box::new(DockerboxError::api("daemon restarting", Some(503))),
        };
        assert!(wrapped.is_retryable());
    }

    #[test]
    fn test_wrapped_error_message_names_stage() {
        let err = DockerboxError::RunFailed {
            source: Box::new(DockerboxError::api("container exited early", Some(409))),
        };
        assert_eq!(
            err.to_string(),
            "Sandbox run failed: Backend API error: container exited early"
        );
    }
}
