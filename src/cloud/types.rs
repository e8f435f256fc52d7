//! Backing service resource types
//!
//! Wire shapes shared by the HTTP client and the in-memory service.

use crate::volume::capacity::{DeploymentType, StorageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of a backing filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilesystemLifecycle {
    Available,
    Creating,
    Failed,
    Deleting,
    Misconfigured,
    Updating,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for FilesystemLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilesystemLifecycle::Available => "AVAILABLE",
            FilesystemLifecycle::Creating => "CREATING",
            FilesystemLifecycle::Failed => "FAILED",
            FilesystemLifecycle::Deleting => "DELETING",
            FilesystemLifecycle::Misconfigured => "MISCONFIGURED",
            FilesystemLifecycle::Updating => "UPDATING",
            FilesystemLifecycle::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Administrative Actions
// =============================================================================

/// Kind of administrative action recorded by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    FileSystemUpdate,
    StorageOptimization,
    #[serde(other)]
    Other,
}

/// Status of an administrative action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    InProgress,
    UpdatedOptimizing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ActionStatus {
    /// The new capacity is usable
    pub fn is_success(&self) -> bool {
        matches!(self, ActionStatus::UpdatedOptimizing | ActionStatus::Completed)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::InProgress)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Pending => "PENDING",
            ActionStatus::InProgress => "IN_PROGRESS",
            ActionStatus::UpdatedOptimizing => "UPDATED_OPTIMIZING",
            ActionStatus::Completed => "COMPLETED",
            ActionStatus::Failed => "FAILED",
            ActionStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A mutating operation the service is running (or ran) on a filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdministrativeAction {
    pub action_type: ActionType,
    pub status: ActionStatus,
    /// Capacity the action resizes to, for filesystem updates
    #[serde(default)]
    pub target_storage_capacity_gib: Option<u64>,
    #[serde(default)]
    pub failure_message: Option<String>,
    pub request_time: DateTime<Utc>,
}

impl AdministrativeAction {
    /// Whether this action is a resize to `capacity_gib`
    pub fn is_resize_to(&self, capacity_gib: u64) -> bool {
        self.action_type == ActionType::FileSystemUpdate
            && self.target_storage_capacity_gib == Some(capacity_gib)
    }
}

// =============================================================================
// Filesystem
// =============================================================================

/// A provisioned backing filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filesystem {
    pub filesystem_id: String,
    pub dns_name: String,
    pub mount_name: String,
    pub storage_capacity_gib: u64,
    pub storage_type: StorageType,
    #[serde(default)]
    pub deployment_type: Option<DeploymentType>,
    #[serde(default)]
    pub per_unit_storage_throughput: Option<u32>,
    pub lifecycle: FilesystemLifecycle,
    #[serde(default)]
    pub administrative_actions: Vec<AdministrativeAction>,
    pub creation_time: DateTime<Utc>,
}

impl Filesystem {
    /// Most recent resize action targeting `capacity_gib`
    pub fn latest_resize_to(&self, capacity_gib: u64) -> Option<&AdministrativeAction> {
        self.administrative_actions
            .iter()
            .filter(|a| a.is_resize_to(capacity_gib))
            .max_by_key(|a| a.request_time)
    }
}

/// Creation request. `client_request_token` is the orchestrator's volume
/// name and makes the call idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFilesystemInput {
    pub client_request_token: String,
    pub storage_capacity_gib: u64,
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub storage_type: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_type: Option<DeploymentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_unit_storage_throughput: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_backup_retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_automatic_backup_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_tags_to_backups: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_compression_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_maintenance_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_type_version: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

// =============================================================================
// API Errors
// =============================================================================

/// Failures reported by the backing service API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("filesystem not found: {0}")]
    NotFound(String),

    #[error("update already in progress: {0}")]
    UpdateInProgress(String),

    #[error("idempotent parameter mismatch: {0}")]
    IdempotentParameterMismatch(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
