//! HTTP filesystem service client
//!
//! JSON-over-HTTP client for the filesystem provisioning service. Every
//! call carries the configured request deadline.

use super::types::*;
use super::FilesystemApi;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Message fragment the service uses when an update is already running
const UPDATE_IN_PROGRESS_MARKER: &str = "already in progress";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpFilesystemApiConfig {
    /// Service base URL, e.g. `https://fsx.internal:8443`
    pub endpoint: String,
    /// Deadline of a single remote call
    pub request_timeout: Duration,
}

impl Default for HttpFilesystemApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8443".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStorageCapacityRequest {
    storage_capacity_gib: u64,
}

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

// =============================================================================
// HTTP API
// =============================================================================

/// Filesystem API backed by the remote service
pub struct HttpFilesystemApi {
    config: HttpFilesystemApiConfig,
    client: Client,
}

impl HttpFilesystemApi {
    pub fn new(config: HttpFilesystemApiConfig) -> crate::error::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    fn filesystems_url(&self) -> String {
        format!("{}/v1/filesystems", self.config.endpoint.trim_end_matches('/'))
    }

    fn filesystem_url(&self, filesystem_id: &str) -> String {
        format!(
            "{}/{}",
            self.filesystems_url(),
            urlencoding::encode(filesystem_id)
        )
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> ApiResult<(StatusCode, Vec<u8>)> {
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok((status, bytes.to_vec()))
        } else {
            Err(classify_error(status, &bytes))
        }
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> ApiResult<T> {
        let (_, bytes) = self.send(method, url, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Service(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl FilesystemApi for HttpFilesystemApi {
    async fn create_filesystem(&self, input: CreateFilesystemInput) -> ApiResult<Filesystem> {
        let url = self.filesystems_url();
        self.send_json(Method::POST, &url, Some(&input)).await
    }

    async fn describe_filesystem(&self, filesystem_id: &str) -> ApiResult<Filesystem> {
        let url = self.filesystem_url(filesystem_id);
        self.send_json::<(), _>(Method::GET, &url, None).await
    }

    async fn delete_filesystem(&self, filesystem_id: &str) -> ApiResult<()> {
        let url = self.filesystem_url(filesystem_id);
        self.send::<()>(Method::DELETE, &url, None).await.map(|_| ())
    }

    async fn update_storage_capacity(
        &self,
        filesystem_id: &str,
        capacity_gib: u64,
    ) -> ApiResult<Filesystem> {
        let url = self.filesystem_url(filesystem_id);
        let body = UpdateStorageCapacityRequest {
            storage_capacity_gib: capacity_gib,
        };
        self.send_json(Method::PATCH, &url, Some(&body)).await
    }

    fn api_name(&self) -> &str {
        &self.config.endpoint
    }
}

/// Map an error response onto [`ApiError`]
fn classify_error(status: StatusCode, body: &[u8]) -> ApiError {
    let parsed: Option<ServiceErrorBody> = serde_json::from_slice(body).ok();
    let (code, message) = match parsed {
        Some(b) => (b.code, b.message),
        None => (String::new(), String::from_utf8_lossy(body).into_owned()),
    };

    match code.as_str() {
        "FileSystemNotFound" => return ApiError::NotFound(message),
        "IdempotentParameterMismatch" => return ApiError::IdempotentParameterMismatch(message),
        "BadRequest" if message.contains(UPDATE_IN_PROGRESS_MARKER) => {
            return ApiError::UpdateInProgress(message)
        }
        _ => {}
    }

    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::CONFLICT if message.contains(UPDATE_IN_PROGRESS_MARKER) => {
            ApiError::UpdateInProgress(message)
        }
        s if s.is_client_error() => {
            ApiError::BadRequest(format!("{} {}", code, message).trim().to_string())
        }
        _ => ApiError::Service(format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::capacity::StorageType;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::Utc;

    #[test]
    fn test_classify_error_codes() {
        let body = br#"{"code":"FileSystemNotFound","message":"fs-1 not found"}"#;
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, body),
            ApiError::NotFound("fs-1 not found".into())
        );

        let body = br#"{"code":"BadRequest","message":"There is an update already in progress"}"#;
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, body),
            ApiError::UpdateInProgress("There is an update already in progress".into())
        );

        let body = br#"{"code":"IdempotentParameterMismatch","message":"token reused"}"#;
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, body),
            ApiError::IdempotentParameterMismatch("token reused".into())
        );

        assert_eq!(
            classify_error(StatusCode::BAD_GATEWAY, b"upstream down"),
            ApiError::Service("HTTP 502: upstream down".into())
        );
    }

    #[test]
    fn test_urls_are_encoded() {
        let api = HttpFilesystemApi::new(HttpFilesystemApiConfig {
            endpoint: "http://fsx.internal/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(api.filesystems_url(), "http://fsx.internal/v1/filesystems");
        assert_eq!(
            api.filesystem_url("fs 1"),
            "http://fsx.internal/v1/filesystems/fs%201"
        );
    }

    #[tokio::test]
    async fn test_describe_against_local_service() {
        async fn describe(Path(id): Path<String>) -> Result<Json<Filesystem>, (AxumStatus, String)> {
            if id != "fs-1" {
                return Err((
                    AxumStatus::NOT_FOUND,
                    r#"{"code":"FileSystemNotFound","message":"missing"}"#.to_string(),
                ));
            }
            Ok(Json(Filesystem {
                filesystem_id: id,
                dns_name: "fs-1.fsx.local".into(),
                mount_name: "abcdef12".into(),
                storage_capacity_gib: 1200,
                storage_type: StorageType::Ssd,
                deployment_type: None,
                per_unit_storage_throughput: None,
                lifecycle: FilesystemLifecycle::Available,
                administrative_actions: vec![],
                creation_time: Utc::now(),
            }))
        }

        let app = Router::new().route("/v1/filesystems/:id", get(describe));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let api = HttpFilesystemApi::new(HttpFilesystemApiConfig {
            endpoint: format!("http://{}", addr),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let fs = api.describe_filesystem("fs-1").await.unwrap();
        assert_eq!(fs.mount_name, "abcdef12");
        assert_eq!(fs.lifecycle, FilesystemLifecycle::Available);

        let err = api.describe_filesystem("fs-2").await.unwrap_err();
        assert_eq!(err, ApiError::NotFound("missing".into()));
    }
}
