//! Whole-filesystem provisioner
//!
//! One backing filesystem per volume. The volume id is the filesystem id.

use crate::cloud::{CreateFilesystemInput, FilesystemCloud, FilesystemLifecycle};
use crate::domain::ports::{
    ProvisionContext, Provisioner, Volume, CONTEXT_DNS_NAME, CONTEXT_MOUNT_NAME,
};
use crate::error::{Error, Result};
use crate::volume::capacity::{gib_to_bytes, quantize_capacity_gib};
use crate::volume::identity::VolumeId;
use crate::volume::parameters::{
    ProvisionerKind, PARAM_SECURITY_GROUP_IDS, PARAM_SUBNET_ID,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Tag recording the orchestrator volume name on the filesystem
pub const VOLUME_NAME_TAG: &str = "CSIVolumeName";

/// Provisions a dedicated backing filesystem per volume
pub struct FilesystemProvisioner {
    cloud: Arc<FilesystemCloud>,
}

impl FilesystemProvisioner {
    pub fn new(cloud: Arc<FilesystemCloud>) -> Self {
        Self { cloud }
    }

    fn build_input(ctx: &ProvisionContext, capacity_gib: u64) -> Result<CreateFilesystemInput> {
        let params = &ctx.parameters;

        let subnet_id = params
            .subnet_id
            .clone()
            .ok_or_else(|| Error::MissingParameter(PARAM_SUBNET_ID.into()))?;
        if params.security_group_ids.is_empty() {
            return Err(Error::MissingParameter(PARAM_SECURITY_GROUP_IDS.into()));
        }

        let mut tags: BTreeMap<String, String> = params.extra_tags.clone();
        tags.insert(VOLUME_NAME_TAG.to_string(), ctx.name.clone());

        Ok(CreateFilesystemInput {
            client_request_token: ctx.name.clone(),
            storage_capacity_gib: capacity_gib,
            subnet_ids: vec![subnet_id],
            security_group_ids: params.security_group_ids.clone(),
            storage_type: params.tier.storage_type.unwrap_or_default(),
            deployment_type: params.tier.deployment_type,
            per_unit_storage_throughput: params.tier.per_unit_storage_throughput,
            kms_key_id: params.kms_key_id.clone(),
            automatic_backup_retention_days: params.automatic_backup_retention_days,
            daily_automatic_backup_start_time: params.daily_automatic_backup_start_time.clone(),
            copy_tags_to_backups: params.copy_tags_to_backups,
            data_compression_type: params.data_compression_type.clone(),
            weekly_maintenance_start_time: params.weekly_maintenance_start_time.clone(),
            file_system_type_version: params.file_system_type_version.clone(),
            tags,
        })
    }
}

#[async_trait]
impl Provisioner for FilesystemProvisioner {
    async fn provision(&self, ctx: &ProvisionContext) -> Result<Volume> {
        let capacity_gib =
            quantize_capacity_gib(ctx.capacity_range.required_bytes, &ctx.parameters.tier);
        ctx.capacity_range.check_limit(gib_to_bytes(capacity_gib))?;

        let input = Self::build_input(ctx, capacity_gib)?;
        let created = self.cloud.create_filesystem(input).await?;

        let fs = if created.lifecycle == FilesystemLifecycle::Available {
            created
        } else {
            self.cloud
                .wait_for_filesystem_available(&created.filesystem_id)
                .await?
        };

        info!(
            "Volume {} provisioned as filesystem {} ({} GiB)",
            ctx.name, fs.filesystem_id, fs.storage_capacity_gib
        );

        let mut volume_context = BTreeMap::new();
        volume_context.insert(CONTEXT_DNS_NAME.to_string(), fs.dns_name.clone());
        volume_context.insert(CONTEXT_MOUNT_NAME.to_string(), fs.mount_name.clone());

        Ok(Volume {
            volume_id: VolumeId::filesystem(fs.filesystem_id)?.encode(),
            capacity_bytes: gib_to_bytes(fs.storage_capacity_gib),
            volume_context,
        })
    }

    async fn delete(&self, volume_id: &VolumeId) -> Result<()> {
        match volume_id {
            VolumeId::Filesystem { filesystem_id } => {
                self.cloud.delete_filesystem(filesystem_id).await
            }
            VolumeId::Shared(_) => Err(Error::InvalidRequest(format!(
                "volume {} is not a whole-filesystem volume",
                volume_id
            ))),
        }
    }

    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Filesystem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudPollConfig, InMemoryConfig, InMemoryFilesystemApi};
    use crate::domain::ports::{AccessMode, CapacityRange, VolumeCapability};
    use crate::volume::capacity::GIB;
    use crate::volume::parameters::VolumeParameters;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryFilesystemApi>, FilesystemProvisioner) {
        let api = Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()));
        let cloud = FilesystemCloud::new(
            api.clone(),
            CloudPollConfig {
                interval: Duration::from_millis(5),
                creation_timeout: Duration::from_secs(2),
                resize_timeout: Duration::from_secs(2),
            },
        );
        (api, FilesystemProvisioner::new(Arc::new(cloud)))
    }

    fn context(name: &str, required_bytes: u64, raw: &[(&str, &str)]) -> ProvisionContext {
        let raw: BTreeMap<String, String> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProvisionContext {
            name: name.into(),
            capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
            parameters: VolumeParameters::parse(&raw).unwrap(),
            capacity_range: CapacityRange::required(required_bytes),
        }
    }

    const NETWORK: [(&str, &str); 2] = [("subnetId", "subnet-1"), ("securityGroupIds", "sg-1,sg-2")];

    #[tokio::test]
    async fn test_provision_waits_until_available() {
        let (api, provisioner) = setup();
        let volume = provisioner
            .provision(&context("pvc-1", 1, &NETWORK))
            .await
            .unwrap();

        assert!(volume.volume_id.starts_with("fs-"));
        assert_eq!(volume.capacity_bytes, 1200 * GIB);
        assert!(volume.volume_context.contains_key(CONTEXT_DNS_NAME));
        assert_eq!(volume.volume_context[CONTEXT_MOUNT_NAME].len(), 8);
        assert_eq!(api.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_per_name() {
        let (api, provisioner) = setup();
        let first = provisioner
            .provision(&context("pvc-1", 100 * GIB, &NETWORK))
            .await
            .unwrap();
        let second = provisioner
            .provision(&context("pvc-1", 200 * GIB, &NETWORK))
            .await
            .unwrap();
        assert_eq!(first.volume_id, second.volume_id);
        assert_eq!(api.filesystem_count(), 1);

        let err = provisioner
            .provision(&context("pvc-1", 5000 * GIB, &NETWORK))
            .await
            .unwrap_err();
        assert_matches!(err, Error::FilesystemConflict { .. });
    }

    #[tokio::test]
    async fn test_missing_network_parameters() {
        let (api, provisioner) = setup();

        let err = provisioner
            .provision(&context("pvc-1", GIB, &[("securityGroupIds", "sg-1")]))
            .await
            .unwrap_err();
        assert_matches!(err, Error::MissingParameter(key) if key == PARAM_SUBNET_ID);

        let err = provisioner
            .provision(&context("pvc-1", GIB, &[("subnetId", "subnet-1")]))
            .await
            .unwrap_err();
        assert_matches!(err, Error::MissingParameter(key) if key == PARAM_SECURITY_GROUP_IDS);
        assert_eq!(api.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_limit_is_checked_after_quantization() {
        let (api, provisioner) = setup();
        let mut ctx = context("pvc-1", GIB, &NETWORK);
        ctx.capacity_range.limit_bytes = 100 * GIB;

        let err = provisioner.provision(&ctx).await.unwrap_err();
        assert_matches!(err, Error::CapacityOutOfRange(_));
        assert_eq!(api.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_creation_surfaces_state() {
        let (api, provisioner) = setup();
        api.set_creation_outcome(FilesystemLifecycle::Failed);

        let err = provisioner
            .provision(&context("pvc-1", GIB, &NETWORK))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UnexpectedState { state, .. } if state == "FAILED");
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let (_, provisioner) = setup();
        let volume = provisioner
            .provision(&context("pvc-1", GIB, &NETWORK))
            .await
            .unwrap();
        let id = VolumeId::parse(&volume.volume_id).unwrap();

        provisioner.delete(&id).await.unwrap();
        provisioner.delete(&id).await.unwrap();
    }
}
