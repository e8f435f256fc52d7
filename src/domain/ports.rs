//! Domain Ports - Request types and collaborator traits for the volume driver
//!
//! These types describe the inbound volume-plugin surface. The traits define
//! the boundaries between the lifecycle manager and its collaborators: the
//! provisioning strategies and the node-side mount helper.

use crate::error::{Error, Result};
use crate::volume::identity::VolumeId;
use crate::volume::parameters::{ProvisionerKind, VolumeParameters};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Volume Capabilities
// =============================================================================

/// How many nodes and writers a volume is shared between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// Access modes every volume of this driver supports
    pub const ALL: [AccessMode; 5] = [
        AccessMode::SingleNodeWriter,
        AccessMode::SingleNodeReaderOnly,
        AccessMode::MultiNodeReaderOnly,
        AccessMode::MultiNodeSingleWriter,
        AccessMode::MultiNodeMultiWriter,
    ];

    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            AccessMode::SingleNodeReaderOnly | AccessMode::MultiNodeReaderOnly
        )
    }
}

/// Whether the volume is consumed as a filesystem or a raw block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessType {
    Mount {
        #[serde(default, rename = "fsType")]
        fs_type: Option<String>,
        #[serde(default, rename = "mountFlags")]
        mount_flags: Vec<String>,
    },
    Block,
}

impl Default for AccessType {
    fn default() -> Self {
        AccessType::Mount {
            fs_type: None,
            mount_flags: Vec::new(),
        }
    }
}

/// One requested capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCapability {
    pub access_mode: AccessMode,
    #[serde(default)]
    pub access_type: AccessType,
}

impl VolumeCapability {
    /// Mount capability with no extra flags
    pub fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            access_type: AccessType::default(),
        }
    }

    /// Whether this driver can serve the capability
    pub fn is_supported(&self) -> bool {
        matches!(self.access_type, AccessType::Mount { .. })
            && AccessMode::ALL.contains(&self.access_mode)
    }

    pub fn mount_flags(&self) -> &[String] {
        match &self.access_type {
            AccessType::Mount { mount_flags, .. } => mount_flags,
            AccessType::Block => &[],
        }
    }
}

/// Reject an empty or unsupported capability list
pub fn ensure_capabilities_supported(capabilities: &[VolumeCapability]) -> Result<()> {
    if capabilities.is_empty() {
        return Err(Error::InvalidRequest(
            "volume capabilities must be provided".into(),
        ));
    }
    match capabilities.iter().find(|c| !c.is_supported()) {
        Some(unsupported) => Err(Error::UnsupportedCapability(format!("{:?}", unsupported))),
        None => Ok(()),
    }
}

// =============================================================================
// Controller Requests/Responses
// =============================================================================

/// Requested size bounds in bytes; zero or absent means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: u64,
    #[serde(default)]
    pub limit_bytes: u64,
}

impl CapacityRange {
    pub fn required(bytes: u64) -> Self {
        Self {
            required_bytes: bytes,
            limit_bytes: 0,
        }
    }

    /// Fail if `capacity_bytes` exceeds a set limit
    pub fn check_limit(&self, capacity_bytes: u64) -> Result<()> {
        if self.limit_bytes > 0 && capacity_bytes > self.limit_bytes {
            return Err(Error::CapacityOutOfRange(format!(
                "capacity {} bytes exceeds limit {} bytes",
                capacity_bytes, self.limit_bytes
            )));
        }
        Ok(())
    }
}

/// CreateVolume request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    /// Orchestrator-chosen name, used as the idempotency token
    pub name: String,
    pub capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

/// A provisioned volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub volume_id: String,
    pub capacity_bytes: u64,
    /// Attributes handed back on publish
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

/// ControllerExpandVolume response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandVolumeResponse {
    pub capacity_bytes: u64,
    pub node_expansion_required: bool,
}

/// ValidateVolumeCapabilities response; `confirmed` is empty when any
/// requested capability is unsupported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub confirmed: Vec<VolumeCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Node Requests
// =============================================================================

/// NodePublishVolume request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
    pub capability: VolumeCapability,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

/// Keys of the volume context returned by CreateVolume
pub const CONTEXT_DNS_NAME: &str = "dnsname";
pub const CONTEXT_MOUNT_NAME: &str = "mountname";

// =============================================================================
// Provisioner Port
// =============================================================================

/// Everything a strategy needs to provision one volume
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    pub name: String,
    pub capabilities: Vec<VolumeCapability>,
    pub parameters: VolumeParameters,
    pub capacity_range: CapacityRange,
}

/// Trait for provisioning strategies
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the volume, or return the existing one for the same name
    async fn provision(&self, ctx: &ProvisionContext) -> Result<Volume>;

    /// Delete the volume. An already-absent volume is success.
    async fn delete(&self, volume_id: &VolumeId) -> Result<()>;

    /// Strategy served by this provisioner
    fn kind(&self) -> ProvisionerKind;
}

pub type ProvisionerRef = Arc<dyn Provisioner>;

// =============================================================================
// Mounter Port
// =============================================================================

/// Node-side mount interface
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Create `path` and any missing parents
    async fn make_dir(&self, path: &Path) -> Result<()>;

    async fn mount(&self, source: &str, target: &Path, fs_type: &str, options: &[String])
        -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;

    /// Cheap check that may miss bind mounts
    async fn is_likely_not_mount_point(&self, path: &Path) -> Result<bool>;

    async fn path_exists(&self, path: &Path) -> Result<bool>;

    /// Whether an error from a stat or mount check indicates a stale or
    /// corrupted mount that should be unmounted and retried
    fn is_corrupted_mount(&self, err: &Error) -> bool;
}

pub type MounterRef = Arc<dyn Mounter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_support() {
        for mode in AccessMode::ALL {
            assert!(VolumeCapability::mount(mode).is_supported());
        }

        let block = VolumeCapability {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Block,
        };
        assert!(!block.is_supported());
        assert!(ensure_capabilities_supported(&[block]).is_err());
        assert!(ensure_capabilities_supported(&[]).is_err());
    }

    #[test]
    fn test_capacity_limit() {
        let range = CapacityRange {
            required_bytes: 10,
            limit_bytes: 100,
        };
        assert!(range.check_limit(100).is_ok());
        assert!(range.check_limit(101).is_err());
        assert!(CapacityRange::required(10).check_limit(u64::MAX).is_ok());
    }

    #[test]
    fn test_request_wire_format() {
        let json = r#"{
            "name": "pvc-1",
            "capabilities": [{"accessMode": "MULTI_NODE_MULTI_WRITER"}],
            "parameters": {"subnetId": "subnet-1"},
            "capacityRange": {"requiredBytes": 1}
        }"#;
        let req: CreateVolumeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.capabilities[0].access_type, AccessType::default());
        assert_eq!(req.capacity_range.unwrap().limit_bytes, 0);
    }
}
