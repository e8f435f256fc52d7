//! Backing Service Client
//!
//! Wraps the remote filesystem-provisioning API. The raw calls live behind
//! the [`FilesystemApi`] port (HTTP in production, in-memory for tests and
//! standalone mode); [`FilesystemCloud`] adds the semantics the
//! provisioners rely on: idempotent create with conflict detection,
//! not-found-tolerant delete, resize recovery when an update is already
//! running, and the creation/resize readiness polls.

pub mod http;
pub mod memory;
pub mod poll;
pub mod types;

pub use http::{HttpFilesystemApi, HttpFilesystemApiConfig};
pub use memory::{InMemoryConfig, InMemoryFilesystemApi};
pub use poll::{PollPolicy, PollStatus};
pub use types::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Filesystem API Port
// =============================================================================

/// Raw remote calls against the provisioning service
#[async_trait]
pub trait FilesystemApi: Send + Sync {
    /// Create a filesystem; idempotent on `client_request_token`
    async fn create_filesystem(&self, input: CreateFilesystemInput) -> ApiResult<Filesystem>;

    async fn describe_filesystem(&self, filesystem_id: &str) -> ApiResult<Filesystem>;

    async fn delete_filesystem(&self, filesystem_id: &str) -> ApiResult<()>;

    /// Start a storage capacity update
    async fn update_storage_capacity(
        &self,
        filesystem_id: &str,
        capacity_gib: u64,
    ) -> ApiResult<Filesystem>;

    /// Name used in logs
    fn api_name(&self) -> &str;
}

pub type FilesystemApiRef = Arc<dyn FilesystemApi>;

// =============================================================================
// Client Configuration
// =============================================================================

/// Polling behaviour of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudPollConfig {
    pub interval: Duration,
    pub creation_timeout: Duration,
    pub resize_timeout: Duration,
}

impl Default for CloudPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            creation_timeout: Duration::from_secs(600),
            resize_timeout: Duration::from_secs(1800),
        }
    }
}

// =============================================================================
// Filesystem Cloud Client
// =============================================================================

/// Client over a [`FilesystemApi`]
pub struct FilesystemCloud {
    api: FilesystemApiRef,
    poll: CloudPollConfig,
    shutdown: CancellationToken,
}

impl FilesystemCloud {
    pub fn new(api: FilesystemApiRef, poll: CloudPollConfig) -> Self {
        Self {
            api,
            poll,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort every running poll
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn api_name(&self) -> &str {
        self.api.api_name()
    }

    /// Create a filesystem for `input.client_request_token`.
    ///
    /// Repeating the call with the same token and capacity returns the same
    /// filesystem; the same token with a different capacity is a conflict.
    pub async fn create_filesystem(&self, input: CreateFilesystemInput) -> Result<Filesystem> {
        let name = input.client_request_token.clone();
        let requested_gib = input.storage_capacity_gib;

        info!(
            "Creating filesystem for volume {} ({} GiB, {})",
            name, requested_gib, input.storage_type
        );

        let fs = self.api.create_filesystem(input).await.map_err(|e| match e {
            ApiError::IdempotentParameterMismatch(reason) => Error::FilesystemConflict {
                name: name.clone(),
                reason,
            },
            other => map_api_error("create filesystem", other),
        })?;

        if fs.storage_capacity_gib != requested_gib {
            return Err(Error::FilesystemConflict {
                name,
                reason: format!(
                    "existing filesystem {} has {} GiB, requested {} GiB",
                    fs.filesystem_id, fs.storage_capacity_gib, requested_gib
                ),
            });
        }

        debug!("Filesystem {} is {}", fs.filesystem_id, fs.lifecycle);
        Ok(fs)
    }

    pub async fn describe_filesystem(&self, filesystem_id: &str) -> Result<Filesystem> {
        self.api
            .describe_filesystem(filesystem_id)
            .await
            .map_err(|e| map_api_error("describe filesystem", e))
    }

    /// Delete a filesystem. An already-deleted filesystem is success.
    pub async fn delete_filesystem(&self, filesystem_id: &str) -> Result<()> {
        info!("Deleting filesystem {}", filesystem_id);

        match self.api.delete_filesystem(filesystem_id).await {
            Ok(()) => Ok(()),
            Err(ApiError::NotFound(_)) => {
                info!("Filesystem {} already deleted", filesystem_id);
                Ok(())
            }
            Err(e) => Err(map_api_error("delete filesystem", e)),
        }
    }

    /// Request a resize to `new_capacity_gib`.
    ///
    /// If the service reports an update already in progress and that update
    /// targets the same capacity, it is adopted as this request's action so
    /// a retry after a client-side timeout does not fail or double-submit.
    pub async fn resize_filesystem(&self, filesystem_id: &str, new_capacity_gib: u64) -> Result<u64> {
        info!(
            "Resizing filesystem {} to {} GiB",
            filesystem_id, new_capacity_gib
        );

        match self
            .api
            .update_storage_capacity(filesystem_id, new_capacity_gib)
            .await
        {
            Ok(_) => Ok(new_capacity_gib),
            Err(ApiError::UpdateInProgress(reason)) => {
                let fs = self.describe_filesystem(filesystem_id).await?;
                match fs.latest_resize_to(new_capacity_gib) {
                    Some(action) if !matches!(action.status, ActionStatus::Failed) => {
                        info!(
                            "Adopting in-progress resize of {} to {} GiB ({})",
                            filesystem_id, new_capacity_gib, action.status
                        );
                        Ok(new_capacity_gib)
                    }
                    _ => Err(Error::BackendOperationFailed {
                        operation: "resize filesystem".into(),
                        reason,
                    }),
                }
            }
            Err(e) => Err(map_api_error("resize filesystem", e)),
        }
    }

    /// Block until the filesystem leaves CREATING. Any state other than
    /// AVAILABLE is an error.
    pub async fn wait_for_filesystem_available(&self, filesystem_id: &str) -> Result<Filesystem> {
        let policy = PollPolicy::new(self.poll.interval, self.poll.creation_timeout);
        let api = self.api.clone();
        let id = filesystem_id.to_string();

        poll::poll_until(
            policy,
            &self.shutdown,
            "filesystem creation",
            || {
                let api = api.clone();
                let id = id.clone();
                async move {
                    let fs = api
                        .describe_filesystem(&id)
                        .await
                        .map_err(|e| map_api_error("describe filesystem", e))?;
                    match fs.lifecycle {
                        FilesystemLifecycle::Available => Ok(PollStatus::Ready(fs)),
                        FilesystemLifecycle::Creating => {
                            Ok(PollStatus::Pending(fs.lifecycle.to_string()))
                        }
                        other => Err(Error::UnexpectedState {
                            filesystem_id: id,
                            action: "become available".into(),
                            state: other.to_string(),
                        }),
                    }
                }
            },
            |last_state| Error::WaitTimeout {
                filesystem_id: filesystem_id.to_string(),
                action: "become available".into(),
                last_state,
            },
        )
        .await
    }

    /// Block until the resize action targeting `capacity_gib` succeeds.
    /// A FAILED action surfaces the service's message verbatim.
    pub async fn wait_for_filesystem_resize(&self, filesystem_id: &str, capacity_gib: u64) -> Result<()> {
        let policy = PollPolicy::new(self.poll.interval, self.poll.resize_timeout);
        let api = self.api.clone();
        let id = filesystem_id.to_string();

        poll::poll_until(
            policy,
            &self.shutdown,
            "filesystem resize",
            || {
                let api = api.clone();
                let id = id.clone();
                async move {
                    let fs = api
                        .describe_filesystem(&id)
                        .await
                        .map_err(|e| map_api_error("describe filesystem", e))?;
                    let Some(action) = fs.latest_resize_to(capacity_gib) else {
                        warn!(
                            "No resize action to {} GiB recorded on {} yet",
                            capacity_gib, id
                        );
                        return Ok(PollStatus::Pending("NO_ACTION".to_string()));
                    };
                    match action.status {
                        status if status.is_success() => Ok(PollStatus::Ready(())),
                        ActionStatus::Failed => Err(Error::ResizeFailed {
                            filesystem_id: id,
                            target_gib: capacity_gib,
                            message: action.failure_message.clone().unwrap_or_default(),
                        }),
                        status => Ok(PollStatus::Pending(status.to_string())),
                    }
                }
            },
            |last_state| Error::WaitTimeout {
                filesystem_id: filesystem_id.to_string(),
                action: format!("resize to {} GiB", capacity_gib),
                last_state,
            },
        )
        .await
    }
}

/// Translate a remote failure into the driver taxonomy
pub(crate) fn map_api_error(operation: &str, err: ApiError) -> Error {
    match err {
        ApiError::NotFound(name) => Error::ResourceNotFound {
            kind: "Filesystem".into(),
            name,
        },
        ApiError::BadRequest(reason) => Error::InvalidRequest(format!("{}: {}", operation, reason)),
        other => Error::BackendOperationFailed {
            operation: operation.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::capacity::StorageType;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn fast_poll() -> CloudPollConfig {
        CloudPollConfig {
            interval: Duration::from_millis(5),
            creation_timeout: Duration::from_millis(500),
            resize_timeout: Duration::from_millis(500),
        }
    }

    fn input(name: &str, gib: u64) -> CreateFilesystemInput {
        CreateFilesystemInput {
            client_request_token: name.into(),
            storage_capacity_gib: gib,
            subnet_ids: vec!["subnet-1".into()],
            security_group_ids: vec!["sg-1".into()],
            storage_type: StorageType::Ssd,
            deployment_type: None,
            per_unit_storage_throughput: None,
            kms_key_id: None,
            automatic_backup_retention_days: None,
            daily_automatic_backup_start_time: None,
            copy_tags_to_backups: None,
            data_compression_type: None,
            weekly_maintenance_start_time: None,
            file_system_type_version: None,
            tags: BTreeMap::new(),
        }
    }

    fn cloud(api: Arc<InMemoryFilesystemApi>) -> FilesystemCloud {
        FilesystemCloud::new(api, fast_poll())
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        let cloud = cloud(api.clone());

        let first = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        let second = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        assert_eq!(first.filesystem_id, second.filesystem_id);
        assert_eq!(api.filesystem_count(), 1);
    }

    #[tokio::test]
    async fn test_create_conflict_on_different_capacity() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        let cloud = cloud(api);

        cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        let err = cloud
            .create_filesystem(input("pvc-1", 2400))
            .await
            .unwrap_err();
        assert_matches!(err, Error::FilesystemConflict { .. });
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_wait_for_available() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig {
            describes_until_available: 3,
            ..Default::default()
        }));
        let cloud = cloud(api);

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        assert_eq!(fs.lifecycle, FilesystemLifecycle::Creating);

        let ready = cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap();
        assert_eq!(ready.lifecycle, FilesystemLifecycle::Available);
    }

    #[tokio::test]
    async fn test_wait_for_available_unexpected_state() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        api.set_creation_outcome(FilesystemLifecycle::Failed);
        let cloud = cloud(api);

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        let err = cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap_err();
        assert_matches!(err, Error::UnexpectedState { state, .. } if state == "FAILED");
    }

    #[tokio::test]
    async fn test_wait_for_available_times_out() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig {
            describes_until_available: u32::MAX,
            ..Default::default()
        }));
        let cloud = FilesystemCloud::new(
            api,
            CloudPollConfig {
                interval: Duration::from_millis(5),
                creation_timeout: Duration::from_millis(40),
                resize_timeout: Duration::from_millis(40),
            },
        );

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        let err = cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap_err();
        assert_matches!(err, Error::WaitTimeout { last_state, .. } if last_state == "CREATING");
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        let cloud = cloud(api);
        cloud.delete_filesystem("fs-does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_and_wait() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        let cloud = cloud(api.clone());

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap();

        cloud.resize_filesystem(&fs.filesystem_id, 2400).await.unwrap();
        cloud
            .wait_for_filesystem_resize(&fs.filesystem_id, 2400)
            .await
            .unwrap();

        let resized = cloud.describe_filesystem(&fs.filesystem_id).await.unwrap();
        assert_eq!(resized.storage_capacity_gib, 2400);
    }

    #[tokio::test]
    async fn test_resize_adopts_in_progress_action() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig {
            describes_until_resized: 5,
            ..Default::default()
        }));
        let cloud = cloud(api.clone());

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap();

        cloud.resize_filesystem(&fs.filesystem_id, 2400).await.unwrap();
        // Retry after a client-side timeout: the service rejects the update,
        // the existing action is adopted.
        cloud.resize_filesystem(&fs.filesystem_id, 2400).await.unwrap();
        assert_eq!(api.update_calls(), 2);

        cloud
            .wait_for_filesystem_resize(&fs.filesystem_id, 2400)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resize_in_progress_for_other_capacity_fails() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig {
            describes_until_resized: 5,
            ..Default::default()
        }));
        let cloud = cloud(api);

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap();

        cloud.resize_filesystem(&fs.filesystem_id, 2400).await.unwrap();
        let err = cloud
            .resize_filesystem(&fs.filesystem_id, 3600)
            .await
            .unwrap_err();
        assert_matches!(err, Error::BackendOperationFailed { .. });
    }

    #[tokio::test]
    async fn test_resize_failure_message_is_verbatim() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        api.fail_resizes_with("Not enough free IP addresses in subnet");
        let cloud = cloud(api);

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        cloud
            .wait_for_filesystem_available(&fs.filesystem_id)
            .await
            .unwrap();
        cloud.resize_filesystem(&fs.filesystem_id, 2400).await.unwrap();

        let err = cloud
            .wait_for_filesystem_resize(&fs.filesystem_id, 2400)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::ResizeFailed { message, target_gib: 2400, .. }
                if message == "Not enough free IP addresses in subnet"
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_polls() {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig {
            describes_until_available: u32::MAX,
            ..Default::default()
        }));
        let cloud = Arc::new(FilesystemCloud::new(
            api,
            CloudPollConfig {
                interval: Duration::from_millis(5),
                creation_timeout: Duration::from_secs(60),
                resize_timeout: Duration::from_secs(60),
            },
        ));

        let fs = cloud.create_filesystem(input("pvc-1", 1200)).await.unwrap();
        let waiter = {
            let cloud = cloud.clone();
            tokio::spawn(async move { cloud.wait_for_filesystem_available(&fs.filesystem_id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cloud.shutdown();

        let err = waiter.await.unwrap().unwrap_err();
        assert_matches!(err, Error::Cancelled(_));
    }
}
