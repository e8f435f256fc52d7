//! In-memory filesystem service
//!
//! Simulates the provisioning service's asynchronous behaviour: new
//! filesystems sit in CREATING for a configurable number of describes, and
//! resize actions advance PENDING -> IN_PROGRESS -> COMPLETED one step per
//! describe. Used in standalone mode and tests, with hooks for injecting
//! failures.

use super::types::*;
use super::FilesystemApi;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Timing of the simulated state machine
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Describes a new filesystem stays CREATING for
    pub describes_until_available: u32,
    /// Describes a resize action stays PENDING/IN_PROGRESS for
    pub describes_until_resized: u32,
    /// Suffix of generated DNS names
    pub dns_suffix: String,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            describes_until_available: 1,
            describes_until_resized: 2,
            dns_suffix: "fsx.local".to_string(),
        }
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct FilesystemRecord {
    fs: Filesystem,
    token: String,
    describes_left: u32,
    resize_describes_left: u32,
}

#[derive(Debug, Default)]
struct ServiceState {
    filesystems: BTreeMap<String, FilesystemRecord>,
    /// client request token -> filesystem id
    tokens: BTreeMap<String, String>,
    creation_outcome: Option<FilesystemLifecycle>,
    resize_failure: Option<String>,
    injected_update_error: Option<ApiError>,
}

// =============================================================================
// In-memory API
// =============================================================================

/// Simulated provisioning service
pub struct InMemoryFilesystemApi {
    config: InMemoryConfig,
    state: Mutex<ServiceState>,
    next_id: AtomicU64,
    create_calls: AtomicU64,
    update_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl InMemoryFilesystemApi {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ServiceState::default()),
            next_id: AtomicU64::new(1),
            create_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
        }
    }

    /// Lifecycle a CREATING filesystem settles in (AVAILABLE by default)
    pub fn set_creation_outcome(&self, lifecycle: FilesystemLifecycle) {
        self.state.lock().creation_outcome = Some(lifecycle);
    }

    /// Make every subsequent resize end in FAILED with `message`
    pub fn fail_resizes_with(&self, message: impl Into<String>) {
        self.state.lock().resize_failure = Some(message.into());
    }

    /// Fail the next update call with `error`
    pub fn inject_update_error(&self, error: ApiError) {
        self.state.lock().injected_update_error = Some(error);
    }

    pub fn filesystem_count(&self) -> usize {
        self.state.lock().filesystems.len()
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    fn generate_id(&self) -> String {
        format!("fs-{:017x}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Advance the simulated state machine by one describe
    fn advance(record: &mut FilesystemRecord, outcome: &FilesystemLifecycle, resize_failure: Option<&str>) {
        if record.fs.lifecycle == FilesystemLifecycle::Creating {
            if record.describes_left == 0 {
                record.fs.lifecycle = outcome.clone();
            } else {
                record.describes_left -= 1;
            }
        }

        let mut completed_capacity = None;
        for action in record
            .fs
            .administrative_actions
            .iter_mut()
            .filter(|a| a.status.is_pending())
        {
            if record.resize_describes_left > 0 {
                record.resize_describes_left -= 1;
                action.status = ActionStatus::InProgress;
                continue;
            }
            match resize_failure {
                Some(message) => {
                    action.status = ActionStatus::Failed;
                    action.failure_message = Some(message.to_string());
                }
                None => {
                    action.status = ActionStatus::Completed;
                    completed_capacity = action.target_storage_capacity_gib;
                }
            }
        }

        if let Some(capacity) = completed_capacity {
            record.fs.storage_capacity_gib = capacity;
            record.fs.lifecycle = FilesystemLifecycle::Available;
        }
    }
}

#[async_trait]
impl FilesystemApi for InMemoryFilesystemApi {
    async fn create_filesystem(&self, input: CreateFilesystemInput) -> ApiResult<Filesystem> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);

        if input.subnet_ids.is_empty() {
            return Err(ApiError::BadRequest("at least one subnet is required".into()));
        }

        let mut state = self.state.lock();

        if let Some(id) = state.tokens.get(&input.client_request_token).cloned() {
            let record = state
                .filesystems
                .get(&id)
                .ok_or_else(|| ApiError::Service(format!("token maps to missing {}", id)))?;
            if record.fs.storage_capacity_gib != input.storage_capacity_gib
                || record.fs.storage_type != input.storage_type
            {
                return Err(ApiError::IdempotentParameterMismatch(format!(
                    "token {} was used with different parameters",
                    input.client_request_token
                )));
            }
            return Ok(record.fs.clone());
        }

        let id = self.generate_id();
        let mount_name = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let fs = Filesystem {
            filesystem_id: id.clone(),
            dns_name: format!("{}.{}", id, self.config.dns_suffix),
            mount_name,
            storage_capacity_gib: input.storage_capacity_gib,
            storage_type: input.storage_type,
            deployment_type: input.deployment_type,
            per_unit_storage_throughput: input.per_unit_storage_throughput,
            lifecycle: FilesystemLifecycle::Creating,
            administrative_actions: Vec::new(),
            creation_time: Utc::now(),
        };

        debug!("Simulated service created {}", id);

        state.tokens.insert(input.client_request_token.clone(), id.clone());
        state.filesystems.insert(
            id,
            FilesystemRecord {
                fs: fs.clone(),
                token: input.client_request_token,
                describes_left: self.config.describes_until_available,
                resize_describes_left: 0,
            },
        );

        Ok(fs)
    }

    async fn describe_filesystem(&self, filesystem_id: &str) -> ApiResult<Filesystem> {
        let mut state = self.state.lock();
        let outcome = state
            .creation_outcome
            .clone()
            .unwrap_or(FilesystemLifecycle::Available);
        let resize_failure = state.resize_failure.clone();

        let record = state
            .filesystems
            .get_mut(filesystem_id)
            .ok_or_else(|| ApiError::NotFound(filesystem_id.to_string()))?;
        Self::advance(record, &outcome, resize_failure.as_deref());

        Ok(record.fs.clone())
    }

    async fn delete_filesystem(&self, filesystem_id: &str) -> ApiResult<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        let record = state
            .filesystems
            .remove(filesystem_id)
            .ok_or_else(|| ApiError::NotFound(filesystem_id.to_string()))?;
        state.tokens.remove(&record.token);
        Ok(())
    }

    async fn update_storage_capacity(
        &self,
        filesystem_id: &str,
        capacity_gib: u64,
    ) -> ApiResult<Filesystem> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if let Some(err) = state.injected_update_error.take() {
            return Err(err);
        }

        let resize_describes = self.config.describes_until_resized;
        let record = state
            .filesystems
            .get_mut(filesystem_id)
            .ok_or_else(|| ApiError::NotFound(filesystem_id.to_string()))?;

        if record
            .fs
            .administrative_actions
            .iter()
            .any(|a| a.status.is_pending())
        {
            return Err(ApiError::UpdateInProgress(format!(
                "Unable to perform the storage capacity update. There is an update already in progress on {}",
                filesystem_id
            )));
        }
        if record.fs.lifecycle != FilesystemLifecycle::Available {
            return Err(ApiError::BadRequest(format!(
                "filesystem {} is {}",
                filesystem_id, record.fs.lifecycle
            )));
        }
        if capacity_gib <= record.fs.storage_capacity_gib {
            return Err(ApiError::BadRequest(format!(
                "new capacity {} GiB must exceed current {} GiB",
                capacity_gib, record.fs.storage_capacity_gib
            )));
        }

        record.fs.lifecycle = FilesystemLifecycle::Updating;
        record.resize_describes_left = resize_describes;
        record.fs.administrative_actions.push(AdministrativeAction {
            action_type: ActionType::FileSystemUpdate,
            status: ActionStatus::Pending,
            target_storage_capacity_gib: Some(capacity_gib),
            failure_message: None,
            request_time: Utc::now(),
        });

        Ok(record.fs.clone())
    }

    fn api_name(&self) -> &str {
        "in-memory"
    }
}
