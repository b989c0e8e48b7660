use std::path::{Path, PathBuf};

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DockerboxError, Result};

/// A response that was read in full, successful or not.
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    /// Daemon error message (`{"message": ...}`), or the raw body.
    pub fn message(&self) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: String,
        }

        match serde_json::from_slice::<ErrorBody>(&self.body) {
            Ok(err) => err.message,
            Err(_) => String::from_utf8_lossy(&self.body).trim().to_string(),
        }
    }

    pub fn into_error(self) -> DockerboxError {
        DockerboxError::api(self.message(), Some(self.status.as_u16()))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            DockerboxError::api(
                format!("Failed to parse response: {}", e),
                Some(self.status.as_u16()),
            )
        })
    }
}

/// Client for the Docker Engine REST API.
///
/// The daemon listens on a Unix domain socket; every call is a single
/// HTTP/1.1 request on that socket.
pub struct DockerApiClient {
    socket_path: PathBuf,
    /// Optional `/v1.xx` prefix pinning the API version
    version_prefix: String,
    client: Client<hyperlocal::UnixConnector, Full<Bytes>>,
}

impl DockerApiClient {
    pub fn new(socket_path: &Path, api_version: Option<&str>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(hyperlocal::UnixConnector);
        let version_prefix = match api_version {
            Some(v) => format!("/{}", v.trim_start_matches('/')),
            None => String::new(),
        };

        Self {
            socket_path: socket_path.to_path_buf(),
            version_prefix,
            client,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and read the whole response body.
    pub async fn request<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<ApiResponse> {
        let full_path = format!("{}{}", self.version_prefix, path);
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket_path, &full_path).into();

        let body_bytes = match body {
            Some(b) => Bytes::from(serde_json::to_vec(b).map_err(|e| {
                DockerboxError::api(format!("Failed to serialize request: {}", e), None)
            })?),
            None => Bytes::new(),
        };

        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(Full::new(body_bytes))
            .map_err(|e| DockerboxError::api(format!("Failed to build request: {}", e), None))?;

        debug!(path = %full_path, "Docker API request");

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| DockerboxError::api(format!("Request failed: {}", e), None))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                DockerboxError::api(format!("Failed to read response: {}", e), Some(status.as_u16()))
            })?
            .to_bytes();

        Ok(ApiResponse { status, body })
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request::<()>(Method::GET, path, None).await
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: Option<&T>) -> Result<ApiResponse> {
        self.request(Method::POST, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request::<()>(Method::DELETE, path, None).await
    }
}

/// Body of `POST /containers/create`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainer {
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    /// Must stay false: a TTY merges the streams and drops the framing
    pub tty: bool,
    pub open_stdin: bool,
    pub host_config: HostConfig,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedContainer {
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitResponse {
    pub status_code: i64,
    #[serde(default)]
    pub error: Option<WaitError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitError {
    #[serde(default)]
    pub message: String,
}

/// The parts of a one-shot stats response we read.
#[derive(Debug, Default, Deserialize)]
pub struct StatsResponse {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
}
