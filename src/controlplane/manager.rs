//! Volume Lifecycle Manager
//!
//! Entry point for every volume operation. Selects a provisioning strategy
//! per request, serializes conflicting operations through the in-flight
//! registry, bounds each operation by a deadline, and records metrics.

use crate::cloud::{FilesystemApiRef, FilesystemCloud};
use crate::config::DriverConfig;
use crate::controlplane::metrics::{OperationMetrics, OUTCOME_OK};
use crate::controlplane::provisioners::{
    mount_source, shared_volume_id, ProvisionerSet, ScratchConfig,
};
use crate::domain::ports::*;
use crate::error::{Error, Result};
use crate::volume::capacity::{gib_to_bytes, quantize_capacity_gib, TierSpec};
use crate::volume::identity::VolumeId;
use crate::volume::inflight::{InFlight, InFlightKey};
use crate::volume::parameters::{ProvisionerKind, VolumeParameters};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Manager settings
#[derive(Debug, Clone)]
pub struct VolumeManagerConfig {
    /// Deadline of one operation, including every poll it runs
    pub operation_timeout: Duration,
    /// Scratch mounts for shared-filesystem strategies; `fs_type` is also
    /// the default filesystem type on publish
    pub scratch: ScratchConfig,
}

impl Default for VolumeManagerConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(900),
            scratch: ScratchConfig::default(),
        }
    }
}

impl From<&DriverConfig> for VolumeManagerConfig {
    fn from(config: &DriverConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            scratch: ScratchConfig::from(&config.scratch),
        }
    }
}

// =============================================================================
// Volume Manager
// =============================================================================

/// Volume lifecycle manager
pub struct VolumeManager {
    config: VolumeManagerConfig,
    cloud: Arc<FilesystemCloud>,
    provisioners: ProvisionerSet,
    mounter: MounterRef,
    inflight: InFlight,
    metrics: OperationMetrics,
}

impl VolumeManager {
    /// Create a manager with the three standard strategies
    pub fn new(
        cloud: Arc<FilesystemCloud>,
        mounter: MounterRef,
        config: VolumeManagerConfig,
    ) -> Result<Self> {
        let provisioners = ProvisionerSet::new(cloud.clone(), mounter.clone(), config.scratch.clone());
        Self::with_provisioners(cloud, mounter, provisioners, config)
    }

    /// Create a manager over a custom strategy set
    pub fn with_provisioners(
        cloud: Arc<FilesystemCloud>,
        mounter: MounterRef,
        provisioners: ProvisionerSet,
        config: VolumeManagerConfig,
    ) -> Result<Self> {
        Ok(Self {
            config,
            cloud,
            provisioners,
            mounter,
            inflight: InFlight::new(),
            metrics: OperationMetrics::new()?,
        })
    }

    /// Wire a manager from the driver configuration
    pub fn from_driver_config(
        config: &DriverConfig,
        api: FilesystemApiRef,
        mounter: MounterRef,
    ) -> Result<Self> {
        let cloud = Arc::new(FilesystemCloud::new(api, config.cloud.poll_config()));
        Self::new(cloud, mounter, VolumeManagerConfig::from(config))
    }

    pub fn metrics(&self) -> &OperationMetrics {
        &self.metrics
    }

    pub fn inflight(&self) -> &InFlight {
        &self.inflight
    }

    pub fn backend_name(&self) -> &str {
        self.cloud.api_name()
    }

    /// Cancel every running poll. Operations blocked on a poll fail with
    /// a cancelled error and release their in-flight keys.
    pub fn shutdown(&self) {
        info!("Volume manager shutting down");
        self.cloud.shutdown();
    }

    /// Run one operation under the deadline and record its outcome
    async fn run<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let timeout = self.config.operation_timeout;

        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded {
                operation: operation.to_string(),
                timeout,
            }),
        };

        let outcome = match &result {
            Ok(_) => OUTCOME_OK,
            Err(e) => {
                warn!("{} failed ({}): {}", operation, e.kind(), e);
                e.kind().as_str()
            }
        };
        self.metrics.observe(operation, outcome, start.elapsed());

        result
    }

    // =========================================================================
    // Controller Operations
    // =========================================================================

    /// Provision a volume, or return the existing volume for `request.name`
    pub async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume> {
        self.run("create_volume", async move {
            if request.name.is_empty() {
                return Err(Error::InvalidRequest("volume name must be provided".into()));
            }
            ensure_capabilities_supported(&request.capabilities)?;
            let parameters = VolumeParameters::parse(&request.parameters)?;
            let kind = parameters.kind();
            let provisioner = self.provisioners.get(kind)?;

            // Shared volumes lock on the id they will get, the same key
            // delete and expand use
            let key = match kind {
                ProvisionerKind::Filesystem => request.name.clone(),
                ProvisionerKind::SubDirectory | ProvisionerKind::Fileset => {
                    VolumeId::Shared(shared_volume_id(&parameters, &request.name)?).encode()
                }
            };
            let _guard = self.inflight.acquire(InFlightKey::controller(&key))?;

            info!("Creating volume {} with {} strategy", request.name, kind);
            let ctx = ProvisionContext {
                name: request.name,
                capabilities: request.capabilities,
                parameters,
                capacity_range: request.capacity_range.unwrap_or_default(),
            };
            provisioner.provision(&ctx).await
        })
        .await
    }

    /// Delete a volume. Deleting an absent volume is success.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.run("delete_volume", async move {
            let id = VolumeId::parse(volume_id)?;
            let provisioner = self.provisioners.for_volume(&id)?;

            let _guard = self.inflight.acquire(InFlightKey::controller(volume_id))?;

            info!("Deleting volume {}", volume_id);
            provisioner.delete(&id).await
        })
        .await
    }

    /// Grow a volume to at least `capacity_range.required_bytes`.
    ///
    /// Shared-filesystem volumes have no quota of their own and report the
    /// requested size back without a remote call.
    pub async fn controller_expand_volume(
        &self,
        volume_id: &str,
        capacity_range: CapacityRange,
    ) -> Result<ExpandVolumeResponse> {
        self.run("controller_expand_volume", async move {
            let id = VolumeId::parse(volume_id)?;
            let _guard = self.inflight.acquire(InFlightKey::controller(volume_id))?;

            let capacity_bytes = match &id {
                VolumeId::Shared(_) => {
                    capacity_range.check_limit(capacity_range.required_bytes)?;
                    capacity_range.required_bytes
                }
                VolumeId::Filesystem { filesystem_id } => {
                    self.expand_filesystem(filesystem_id, capacity_range).await?
                }
            };

            Ok(ExpandVolumeResponse {
                capacity_bytes,
                node_expansion_required: false,
            })
        })
        .await
    }

    async fn expand_filesystem(&self, filesystem_id: &str, range: CapacityRange) -> Result<u64> {
        let fs = self.cloud.describe_filesystem(filesystem_id).await?;
        let current_bytes = gib_to_bytes(fs.storage_capacity_gib);

        if range.required_bytes <= current_bytes {
            debug!(
                "Filesystem {} already has {} GiB, no resize needed",
                filesystem_id, fs.storage_capacity_gib
            );
            return Ok(current_bytes);
        }

        let tier = TierSpec {
            deployment_type: fs.deployment_type,
            storage_type: Some(fs.storage_type),
            per_unit_storage_throughput: fs.per_unit_storage_throughput,
        };
        let new_gib = quantize_capacity_gib(range.required_bytes, &tier);
        range.check_limit(gib_to_bytes(new_gib))?;

        let target_gib = self.cloud.resize_filesystem(filesystem_id, new_gib).await?;
        self.cloud
            .wait_for_filesystem_resize(filesystem_id, target_gib)
            .await?;

        info!(
            "Filesystem {} resized from {} GiB to {} GiB",
            filesystem_id, fs.storage_capacity_gib, target_gib
        );
        Ok(gib_to_bytes(target_gib))
    }

    /// Confirm the capabilities if every one is supported
    pub async fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: Vec<VolumeCapability>,
    ) -> Result<ValidationResult> {
        self.run("validate_volume_capabilities", async move {
            let id = VolumeId::parse(volume_id)?;
            if capabilities.is_empty() {
                return Err(Error::InvalidRequest(
                    "volume capabilities must be provided".into(),
                ));
            }
            if let VolumeId::Filesystem { filesystem_id } = &id {
                self.cloud.describe_filesystem(filesystem_id).await?;
            }

            Ok(match ensure_capabilities_supported(&capabilities) {
                Ok(()) => ValidationResult {
                    confirmed: capabilities,
                    message: None,
                },
                Err(e) => ValidationResult {
                    confirmed: Vec::new(),
                    message: Some(e.to_string()),
                },
            })
        })
        .await
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Mount a volume at `request.target_path`. A target that is already a
    /// mount point is left as is; a corrupted one is unmounted first.
    pub async fn node_publish_volume(&self, request: PublishVolumeRequest) -> Result<()> {
        self.run("node_publish_volume", async move {
            if request.target_path.is_empty() {
                return Err(Error::InvalidRequest("target path must be provided".into()));
            }
            ensure_capabilities_supported(std::slice::from_ref(&request.capability))?;
            let id = VolumeId::parse(&request.volume_id)?;
            let source = publish_source(&id, &request)?;

            let _guard = self
                .inflight
                .acquire(InFlightKey::target(&request.volume_id, &request.target_path))?;

            let target = Path::new(&request.target_path);
            if !self.mounter.path_exists(target).await? {
                self.mounter.make_dir(target).await?;
            }

            match self.mounter.is_likely_not_mount_point(target).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        "Volume {} already mounted at {}",
                        request.volume_id, request.target_path
                    );
                    return Ok(());
                }
                Err(e) if self.mounter.is_corrupted_mount(&e) => {
                    warn!(
                        "Corrupted mount at {} ({}), unmounting",
                        request.target_path, e
                    );
                    self.mounter.unmount(target).await?;
                }
                Err(e) => return Err(e),
            }

            let mut options = Vec::new();
            if request.readonly || request.capability.access_mode.is_read_only() {
                options.push("ro".to_string());
            }
            options.extend(request.capability.mount_flags().iter().cloned());

            let fs_type = match &request.capability.access_type {
                AccessType::Mount {
                    fs_type: Some(fs_type),
                    ..
                } if !fs_type.is_empty() => fs_type.as_str(),
                _ => self.config.scratch.fs_type.as_str(),
            };

            self.mounter.mount(&source, target, fs_type, &options).await?;
            info!(
                "Mounted volume {} at {}",
                request.volume_id, request.target_path
            );
            Ok(())
        })
        .await
    }

    /// Unmount a volume from `target_path` and remove the mount point
    pub async fn node_unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<()> {
        self.run("node_unpublish_volume", async move {
            if volume_id.is_empty() || target_path.is_empty() {
                return Err(Error::InvalidRequest(
                    "volume id and target path must be provided".into(),
                ));
            }
            let _guard = self
                .inflight
                .acquire(InFlightKey::target(volume_id, target_path))?;

            let target = Path::new(target_path);
            if !self.mounter.path_exists(target).await? {
                debug!("Target {} does not exist", target_path);
                return Ok(());
            }

            let mounted = match self.mounter.is_likely_not_mount_point(target).await {
                Ok(not_mounted) => !not_mounted,
                Err(e) if self.mounter.is_corrupted_mount(&e) => true,
                Err(e) => return Err(e),
            };
            if mounted {
                self.mounter.unmount(target).await?;
                info!("Unmounted volume {} from {}", volume_id, target_path);
            }

            match tokio::fs::remove_dir(target).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

/// Mount source for a publish request
fn publish_source(id: &VolumeId, request: &PublishVolumeRequest) -> Result<String> {
    match id {
        VolumeId::Shared(shared) => {
            let path = match shared.base_path() {
                "" => shared.subpath().to_string(),
                base => format!("{}/{}", base, shared.subpath()),
            };
            Ok(mount_source(shared.dns_name(), shared.mount_name(), &path))
        }
        VolumeId::Filesystem { .. } => {
            let context = |key: &str| {
                request
                    .volume_context
                    .get(key)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidRequest(format!("volume context is missing {}", key))
                    })
            };
            Ok(mount_source(
                context(CONTEXT_DNS_NAME)?,
                context(CONTEXT_MOUNT_NAME)?,
                "",
            ))
        }
    }
}
