//! Provisioning Parameters
//!
//! Parses the flat storage-class parameter map into typed values. Parsing
//! fails closed: any key that is neither recognized nor under the
//! external-provisioner reserved prefix is rejected so typos surface at
//! provisioning time instead of being silently ignored.

use crate::error::{Error, Result};
use crate::volume::capacity::{DeploymentType, StorageType, TierSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Parameter Keys
// =============================================================================

pub const PARAM_SUBNET_ID: &str = "subnetId";
pub const PARAM_SECURITY_GROUP_IDS: &str = "securityGroupIds";
pub const PARAM_DNS_NAME: &str = "dnsname";
pub const PARAM_MOUNT_NAME: &str = "mountname";
pub const PARAM_BASE_PATH: &str = "basePath";
pub const PARAM_BASE_FILESET: &str = "baseFileset";
pub const PARAM_DEPLOYMENT_TYPE: &str = "deploymentType";
pub const PARAM_STORAGE_TYPE: &str = "storageType";
pub const PARAM_PER_UNIT_STORAGE_THROUGHPUT: &str = "perUnitStorageThroughput";
pub const PARAM_KMS_KEY_ID: &str = "kmsKeyId";
pub const PARAM_BACKUP_RETENTION_DAYS: &str = "automaticBackupRetentionDays";
pub const PARAM_BACKUP_START_TIME: &str = "dailyAutomaticBackupStartTime";
pub const PARAM_COPY_TAGS_TO_BACKUPS: &str = "copyTagsToBackups";
pub const PARAM_DATA_COMPRESSION_TYPE: &str = "dataCompressionType";
pub const PARAM_MAINTENANCE_WINDOW: &str = "weeklyMaintenanceStartTime";
pub const PARAM_FILESYSTEM_TYPE_VERSION: &str = "fileSystemTypeVersion";
pub const PARAM_EXTRA_TAGS: &str = "extraTags";

/// Keys under this prefix belong to the external provisioner sidecar
pub const RESERVED_PARAMETER_PREFIX: &str = "csi.storage.k8s.io/";

const RECOGNIZED_PARAMETERS: &[&str] = &[
    PARAM_SUBNET_ID,
    PARAM_SECURITY_GROUP_IDS,
    PARAM_DNS_NAME,
    PARAM_MOUNT_NAME,
    PARAM_BASE_PATH,
    PARAM_BASE_FILESET,
    PARAM_DEPLOYMENT_TYPE,
    PARAM_STORAGE_TYPE,
    PARAM_PER_UNIT_STORAGE_THROUGHPUT,
    PARAM_KMS_KEY_ID,
    PARAM_BACKUP_RETENTION_DAYS,
    PARAM_BACKUP_START_TIME,
    PARAM_COPY_TAGS_TO_BACKUPS,
    PARAM_DATA_COMPRESSION_TYPE,
    PARAM_MAINTENANCE_WINDOW,
    PARAM_FILESYSTEM_TYPE_VERSION,
    PARAM_EXTRA_TAGS,
];

// =============================================================================
// Provisioner Kind
// =============================================================================

/// Which provisioning strategy serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    /// One backing filesystem per volume
    Filesystem,
    /// A plain directory on a shared filesystem
    SubDirectory,
    /// A fileset on a shared filesystem
    Fileset,
}

impl std::fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionerKind::Filesystem => write!(f, "filesystem"),
            ProvisionerKind::SubDirectory => write!(f, "subdirectory"),
            ProvisionerKind::Fileset => write!(f, "fileset"),
        }
    }
}

// =============================================================================
// Volume Parameters
// =============================================================================

/// Typed view of the provisioning parameter map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeParameters {
    pub subnet_id: Option<String>,
    pub security_group_ids: Vec<String>,
    pub dns_name: Option<String>,
    pub mount_name: Option<String>,
    pub base_path: Option<String>,
    pub base_fileset: Option<String>,
    pub tier: TierSpec,
    pub kms_key_id: Option<String>,
    pub automatic_backup_retention_days: Option<u32>,
    pub daily_automatic_backup_start_time: Option<String>,
    pub copy_tags_to_backups: Option<bool>,
    pub data_compression_type: Option<String>,
    pub weekly_maintenance_start_time: Option<String>,
    pub file_system_type_version: Option<String>,
    pub extra_tags: BTreeMap<String, String>,
}

impl VolumeParameters {
    /// Parse and validate a raw parameter map
    pub fn parse(raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut params = VolumeParameters::default();

        for (key, value) in raw {
            if key.starts_with(RESERVED_PARAMETER_PREFIX) {
                continue;
            }

            match key.as_str() {
                PARAM_SUBNET_ID => params.subnet_id = non_empty(value),
                PARAM_SECURITY_GROUP_IDS => params.security_group_ids = split_list(value),
                PARAM_DNS_NAME => params.dns_name = Some(required(key, value)?),
                PARAM_MOUNT_NAME => params.mount_name = Some(required(key, value)?),
                PARAM_BASE_PATH => params.base_path = Some(trim_path(value)),
                PARAM_BASE_FILESET => params.base_fileset = Some(trim_path(value)),
                PARAM_DEPLOYMENT_TYPE => {
                    params.tier.deployment_type = Some(value.parse::<DeploymentType>()?)
                }
                PARAM_STORAGE_TYPE => params.tier.storage_type = Some(value.parse::<StorageType>()?),
                PARAM_PER_UNIT_STORAGE_THROUGHPUT => {
                    params.tier.per_unit_storage_throughput = Some(parse_number(key, value)?)
                }
                PARAM_KMS_KEY_ID => params.kms_key_id = non_empty(value),
                PARAM_BACKUP_RETENTION_DAYS => {
                    params.automatic_backup_retention_days = Some(parse_number(key, value)?)
                }
                PARAM_BACKUP_START_TIME => params.daily_automatic_backup_start_time = non_empty(value),
                PARAM_COPY_TAGS_TO_BACKUPS => params.copy_tags_to_backups = Some(parse_bool(key, value)?),
                PARAM_DATA_COMPRESSION_TYPE => params.data_compression_type = non_empty(value),
                PARAM_MAINTENANCE_WINDOW => params.weekly_maintenance_start_time = non_empty(value),
                PARAM_FILESYSTEM_TYPE_VERSION => params.file_system_type_version = non_empty(value),
                PARAM_EXTRA_TAGS => params.extra_tags = parse_tags(value)?,
                _ => return Err(Error::UnknownParameter(key.clone())),
            }
        }

        if params.base_path.is_some() && params.base_fileset.is_some() {
            return Err(Error::InvalidRequest(format!(
                "{} and {} are mutually exclusive",
                PARAM_BASE_PATH, PARAM_BASE_FILESET
            )));
        }

        Ok(params)
    }

    /// Select the strategy. A shared-filesystem address selects a shared
    /// strategy; its absence selects whole-filesystem provisioning.
    pub fn kind(&self) -> ProvisionerKind {
        match (&self.dns_name, &self.base_fileset) {
            (None, _) => ProvisionerKind::Filesystem,
            (Some(_), Some(_)) => ProvisionerKind::Fileset,
            (Some(_), None) => ProvisionerKind::SubDirectory,
        }
    }

    /// Base path inside the shared filesystem, whichever key supplied it
    pub fn shared_base(&self) -> &str {
        self.base_fileset
            .as_deref()
            .or(self.base_path.as_deref())
            .unwrap_or_default()
    }
}

/// Check whether a key is accepted by [`VolumeParameters::parse`]
pub fn is_recognized_parameter(key: &str) -> bool {
    key.starts_with(RESERVED_PARAMETER_PREFIX) || RECOGNIZED_PARAMETERS.contains(&key)
}

// =============================================================================
// Value Parsers
// =============================================================================

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// A value that must not be blank when its key is present
fn required(key: &str, value: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| Error::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
        reason: "must not be empty".into(),
    })
}

fn trim_path(value: &str) -> String {
    value.trim().trim_matches('/').to_string()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| Error::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".into(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::InvalidParameter {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

/// Parse `key=value,key2=value2`
fn parse_tags(value: &str) -> Result<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();
    for pair in split_list(value) {
        match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                tags.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => {
                return Err(Error::InvalidParameter {
                    key: PARAM_EXTRA_TAGS.into(),
                    value: value.to_string(),
                    reason: format!("tag {:?} is not of the form key=value", pair),
                })
            }
        }
    }
    Ok(tags)
}
