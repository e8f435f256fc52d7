//! Provisioning Strategies
//!
//! Provides the strategies a volume can be provisioned with:
//! - Filesystem: one dedicated backing filesystem per volume
//! - SubDirectory: a directory on a shared filesystem
//! - Fileset: a fileset on a shared filesystem

pub mod filesystem;
pub mod scratch;
pub mod shared;

pub use filesystem::*;
pub use scratch::*;
pub use shared::*;

use crate::cloud::FilesystemCloud;
use crate::domain::ports::{MounterRef, ProvisionerRef};
use crate::error::{Error, Result};
use crate::volume::identity::VolumeId;
use crate::volume::parameters::ProvisionerKind;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The strategies available to the lifecycle manager, keyed by kind
#[derive(Clone)]
pub struct ProvisionerSet {
    provisioners: BTreeMap<ProvisionerKind, ProvisionerRef>,
}

impl ProvisionerSet {
    /// Build all three strategies over one cloud client and one mounter
    pub fn new(cloud: Arc<FilesystemCloud>, mounter: MounterRef, scratch: ScratchConfig) -> Self {
        let scratch = Arc::new(ScratchMounter::new(mounter, scratch));

        let mut set = Self::empty();
        set.register(Arc::new(FilesystemProvisioner::new(cloud)));
        set.register(Arc::new(SharedFilesystemProvisioner::new(
            SharedUnit::Directory,
            scratch.clone(),
        )));
        set.register(Arc::new(SharedFilesystemProvisioner::new(
            SharedUnit::Fileset,
            scratch,
        )));
        set
    }

    pub fn empty() -> Self {
        Self {
            provisioners: BTreeMap::new(),
        }
    }

    /// Add or replace the provisioner for its kind
    pub fn register(&mut self, provisioner: ProvisionerRef) {
        self.provisioners.insert(provisioner.kind(), provisioner);
    }

    pub fn get(&self, kind: ProvisionerKind) -> Result<ProvisionerRef> {
        self.provisioners
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Unimplemented(format!("no {} provisioner configured", kind)))
    }

    /// Strategy able to delete `volume_id`. Shared units are told apart at
    /// delete time, so either shared strategy serves a shared id.
    pub fn for_volume(&self, volume_id: &VolumeId) -> Result<ProvisionerRef> {
        match volume_id {
            VolumeId::Filesystem { .. } => self.get(ProvisionerKind::Filesystem),
            VolumeId::Shared(_) => self
                .get(ProvisionerKind::SubDirectory)
                .or_else(|_| self.get(ProvisionerKind::Fileset)),
        }
    }

    pub fn kinds(&self) -> Vec<ProvisionerKind> {
        self.provisioners.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudPollConfig, InMemoryConfig, InMemoryFilesystemApi};
    use crate::node::SymlinkMounter;
    use assert_matches::assert_matches;

    // `assert_matches!` formats the value on failure, so it needs `Debug`.
    impl std::fmt::Debug for dyn crate::domain::ports::Provisioner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Provisioner({:?})", self.kind())
        }
    }

    #[test]
    fn test_set_dispatch() {
        let cloud = Arc::new(FilesystemCloud::new(
            Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default())),
            CloudPollConfig::default(),
        ));
        let set = ProvisionerSet::new(
            cloud,
            Arc::new(SymlinkMounter::new("/tmp/unused")),
            ScratchConfig::default(),
        );

        assert_eq!(
            set.kinds(),
            vec![
                ProvisionerKind::Filesystem,
                ProvisionerKind::SubDirectory,
                ProvisionerKind::Fileset
            ]
        );

        let fs = VolumeId::parse("fs-0123").unwrap();
        assert_eq!(set.for_volume(&fs).unwrap().kind(), ProvisionerKind::Filesystem);

        let shared = VolumeId::parse("dns:mnt::sub:sub").unwrap();
        assert_eq!(
            set.for_volume(&shared).unwrap().kind(),
            ProvisionerKind::SubDirectory
        );

        assert_matches!(
            ProvisionerSet::empty().get(ProvisionerKind::Fileset),
            Err(Error::Unimplemented(_))
        );
    }
}
