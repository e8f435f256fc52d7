//! Shared-filesystem provisioners
//!
//! Volumes carved out of an existing filesystem, either as a plain
//! sub-directory or as a fileset. Both are created and removed through a
//! scratch mount of the shared filesystem; neither gets its own quota, so
//! the requested capacity is reported back unchanged.

use super::scratch::ScratchMounter;
use crate::domain::ports::{
    ProvisionContext, Provisioner, Volume, CONTEXT_DNS_NAME, CONTEXT_MOUNT_NAME,
};
use crate::error::{Error, Result};
use crate::volume::identity::{SharedVolumeId, VolumeId};
use crate::volume::parameters::{
    ProvisionerKind, VolumeParameters, PARAM_DNS_NAME, PARAM_MOUNT_NAME,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// File marking a directory as a fileset
pub const FILESET_DESCRIPTOR: &str = ".fileset.json";

/// Mount source of a shared filesystem, optionally rooted at `path`
pub fn mount_source(dns_name: &str, mount_name: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("{}@tcp:/{}", dns_name, mount_name)
    } else {
        format!("{}@tcp:/{}/{}", dns_name, mount_name, path)
    }
}

// =============================================================================
// Units
// =============================================================================

/// What a shared-filesystem volume is materialized as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedUnit {
    Directory,
    Fileset,
}

impl std::fmt::Display for SharedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SharedUnit::Directory => write!(f, "Directory"),
            SharedUnit::Fileset => write!(f, "Fileset"),
        }
    }
}

/// Contents of a fileset's descriptor file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesetDescriptor {
    pub name: String,
    pub capacity_bytes: u64,
    pub created_at: DateTime<Utc>,
}

async fn read_descriptor(dir: &Path) -> Result<Option<FilesetDescriptor>> {
    match tokio::fs::read(dir.join(FILESET_DESCRIPTOR)).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Create `dir` as `unit`, or accept an identical existing unit
async fn create_unit(unit: SharedUnit, dir: &Path, name: &str, capacity_bytes: u64) -> Result<()> {
    match tokio::fs::create_dir(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
            return match (unit, read_descriptor(dir).await?) {
                (SharedUnit::Directory, None) => Ok(()),
                (SharedUnit::Fileset, Some(existing)) if existing.name == name => Ok(()),
                (_, existing) => {
                    let kind = match existing {
                        Some(_) => SharedUnit::Fileset,
                        None => SharedUnit::Directory,
                    };
                    Err(Error::ResourceExists {
                        kind: kind.to_string(),
                        name: dir.display().to_string(),
                    })
                }
            };
        }
        Err(e) => return Err(e.into()),
    }

    if unit == SharedUnit::Fileset {
        let descriptor = FilesetDescriptor {
            name: name.to_string(),
            capacity_bytes,
            created_at: Utc::now(),
        };
        let written = match serde_json::to_vec_pretty(&descriptor) {
            Ok(raw) => tokio::fs::write(dir.join(FILESET_DESCRIPTOR), raw)
                .await
                .map_err(Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_dir_all(dir).await {
                warn!("Failed to remove partial fileset {}: {}", dir.display(), cleanup);
            }
            return Err(e);
        }
    }

    Ok(())
}

/// Remove whatever unit lives at `dir`; absent is success
async fn remove_unit(dir: &Path) -> Result<()> {
    let meta = match tokio::fs::symlink_metadata(dir).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            info!("{} already removed", dir.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(Error::Internal(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let unit = match read_descriptor(dir).await? {
        Some(_) => SharedUnit::Fileset,
        None => SharedUnit::Directory,
    };
    tokio::fs::remove_dir_all(dir).await?;
    info!("Removed {} {}", unit, dir.display());
    Ok(())
}

// =============================================================================
// Provisioner
// =============================================================================

/// Provisions sub-path volumes on a shared filesystem
pub struct SharedFilesystemProvisioner {
    unit: SharedUnit,
    scratch: Arc<ScratchMounter>,
}

impl SharedFilesystemProvisioner {
    pub fn new(unit: SharedUnit, scratch: Arc<ScratchMounter>) -> Self {
        Self { unit, scratch }
    }

    pub fn unit(&self) -> SharedUnit {
        self.unit
    }
}

fn validate_unit_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::InvalidRequest(format!(
            "volume name {:?} cannot be used as a directory name",
            name
        )));
    }
    Ok(())
}

/// Identity a shared-filesystem volume named `name` will be given
pub fn shared_volume_id(params: &VolumeParameters, name: &str) -> Result<SharedVolumeId> {
    let dns_name = params
        .dns_name
        .as_deref()
        .ok_or_else(|| Error::MissingParameter(PARAM_DNS_NAME.into()))?;
    let mount_name = params
        .mount_name
        .as_deref()
        .ok_or_else(|| Error::MissingParameter(PARAM_MOUNT_NAME.into()))?;
    validate_unit_name(name)?;

    SharedVolumeId::new(dns_name, mount_name, params.shared_base(), name)
}

#[async_trait]
impl Provisioner for SharedFilesystemProvisioner {
    async fn provision(&self, ctx: &ProvisionContext) -> Result<Volume> {
        let id = shared_volume_id(&ctx.parameters, &ctx.name)?;

        let capacity_bytes = ctx.capacity_range.required_bytes;
        ctx.capacity_range.check_limit(capacity_bytes)?;

        let source = mount_source(id.dns_name(), id.mount_name(), id.base_path());
        let unit = self.unit;
        let name = ctx.name.clone();
        self.scratch
            .with_scratch_mount(&source, move |root| async move {
                create_unit(unit, &root.join(&name), &name, capacity_bytes).await
            })
            .await?;

        info!(
            "Volume {} provisioned as {} on {}",
            ctx.name, self.unit, source
        );

        let mut volume_context = BTreeMap::new();
        volume_context.insert(CONTEXT_DNS_NAME.to_string(), id.dns_name().to_string());
        volume_context.insert(CONTEXT_MOUNT_NAME.to_string(), id.mount_name().to_string());

        Ok(Volume {
            volume_id: VolumeId::Shared(id).encode(),
            capacity_bytes,
            volume_context,
        })
    }

    async fn delete(&self, volume_id: &VolumeId) -> Result<()> {
        let VolumeId::Shared(id) = volume_id else {
            return Err(Error::InvalidRequest(format!(
                "volume {} is not a shared-filesystem volume",
                volume_id
            )));
        };

        let source = mount_source(id.dns_name(), id.mount_name(), id.base_path());
        let subpath = id.subpath().to_string();
        self.scratch
            .with_scratch_mount(&source, move |root| async move {
                remove_unit(&root.join(subpath)).await
            })
            .await
    }

    fn kind(&self) -> ProvisionerKind {
        match self.unit {
            SharedUnit::Directory => ProvisionerKind::SubDirectory,
            SharedUnit::Fileset => ProvisionerKind::Fileset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::provisioners::scratch::ScratchConfig;
    use crate::domain::ports::{AccessMode, CapacityRange, VolumeCapability};
    use crate::node::SymlinkMounter;
    use crate::volume::capacity::GIB;
    use crate::volume::parameters::VolumeParameters;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        backing: PathBuf,
        scratch: Arc<ScratchMounter>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backing = dir.path().join("backing");
        let scratch = Arc::new(ScratchMounter::new(
            Arc::new(SymlinkMounter::new(&backing)),
            ScratchConfig {
                root: dir.path().join("scratch"),
                ..Default::default()
            },
        ));
        Fixture {
            _dir: dir,
            backing,
            scratch,
        }
    }

    fn context(name: &str, bytes: u64, raw: &[(&str, &str)]) -> ProvisionContext {
        let raw: BTreeMap<String, String> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProvisionContext {
            name: name.into(),
            capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
            parameters: VolumeParameters::parse(&raw).unwrap(),
            capacity_range: CapacityRange::required(bytes),
        }
    }

    #[test]
    fn test_mount_source() {
        assert_eq!(mount_source("dns1", "mnt1", ""), "dns1@tcp:/mnt1");
        assert_eq!(mount_source("dns1", "mnt1", "/base/"), "dns1@tcp:/mnt1/base");
    }

    #[tokio::test]
    async fn test_subdirectory_lifecycle() {
        let f = fixture();
        let provisioner = SharedFilesystemProvisioner::new(SharedUnit::Directory, f.scratch.clone());
        let ctx = context(
            "pvc-1",
            12345,
            &[("dnsname", "dns1"), ("mountname", "mnt1"), ("basePath", "base")],
        );

        let volume = provisioner.provision(&ctx).await.unwrap();
        assert_eq!(volume.volume_id, "dns1:mnt1:base:pvc-1:pvc-1");
        assert_eq!(volume.capacity_bytes, 12345);
        let unit_dir = f.backing.join("dns1/mnt1/base/pvc-1");
        assert!(unit_dir.is_dir());
        assert!(!unit_dir.join(FILESET_DESCRIPTOR).exists());

        // Repeat provisioning is idempotent
        provisioner.provision(&ctx).await.unwrap();

        let id = VolumeId::parse(&volume.volume_id).unwrap();
        provisioner.delete(&id).await.unwrap();
        assert!(!unit_dir.exists());
        provisioner.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_fileset_lifecycle() {
        let f = fixture();
        let provisioner = SharedFilesystemProvisioner::new(SharedUnit::Fileset, f.scratch.clone());
        let ctx = context(
            "pvc-2",
            GIB,
            &[("dnsname", "dns1"), ("mountname", "mnt1"), ("baseFileset", "sets")],
        );

        let volume = provisioner.provision(&ctx).await.unwrap();
        let unit_dir = f.backing.join("dns1/mnt1/sets/pvc-2");
        let descriptor: FilesetDescriptor =
            serde_json::from_slice(&std::fs::read(unit_dir.join(FILESET_DESCRIPTOR)).unwrap())
                .unwrap();
        assert_eq!(descriptor.name, "pvc-2");
        assert_eq!(descriptor.capacity_bytes, GIB);

        provisioner.provision(&ctx).await.unwrap();

        // A directory provisioner deletes filesets too
        let directories = SharedFilesystemProvisioner::new(SharedUnit::Directory, f.scratch.clone());
        directories
            .delete(&VolumeId::parse(&volume.volume_id).unwrap())
            .await
            .unwrap();
        assert!(!unit_dir.exists());
    }

    #[tokio::test]
    async fn test_fileset_over_plain_directory_conflicts() {
        let f = fixture();
        std::fs::create_dir_all(f.backing.join("dns1/mnt1/pvc-3")).unwrap();

        let provisioner = SharedFilesystemProvisioner::new(SharedUnit::Fileset, f.scratch.clone());
        let err = provisioner
            .provision(&context("pvc-3", 1, &[("dnsname", "dns1"), ("mountname", "mnt1")]))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ResourceExists { kind, .. } if kind == "Directory");
    }

    #[tokio::test]
    async fn test_missing_mount_name() {
        let f = fixture();
        let provisioner = SharedFilesystemProvisioner::new(SharedUnit::Directory, f.scratch);
        let err = provisioner
            .provision(&context("pvc-1", 1, &[("dnsname", "dns1")]))
            .await
            .unwrap_err();
        assert_matches!(err, Error::MissingParameter(key) if key == PARAM_MOUNT_NAME);
    }

    #[tokio::test]
    async fn test_limit_below_request() {
        let f = fixture();
        let provisioner = SharedFilesystemProvisioner::new(SharedUnit::Directory, f.scratch);
        let mut ctx = context("pvc-1", 100, &[("dnsname", "dns1"), ("mountname", "mnt1")]);
        ctx.capacity_range.limit_bytes = 10;

        let err = provisioner.provision(&ctx).await.unwrap_err();
        assert_matches!(err, Error::CapacityOutOfRange(_));
    }
}
