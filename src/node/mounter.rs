//! Mount helpers
//!
//! [`CommandMounter`] drives `mount(8)`/`umount(8)` for production nodes.
//! [`SymlinkMounter`] simulates mounts with symlinks into a local directory
//! tree and needs no privileges; standalone mode and tests use it.

use crate::domain::ports::Mounter;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// errnos that mean a mount point is stale or its backing is unreachable:
/// ENOTCONN, ESTALE, EIO, EACCES, EHOSTDOWN
const CORRUPTED_MOUNT_ERRNOS: [i32; 5] = [107, 116, 5, 13, 112];

fn is_corrupted_io(err: &Error) -> bool {
    match err {
        Error::Io(io) => io
            .raw_os_error()
            .map(|code| CORRUPTED_MOUNT_ERRNOS.contains(&code))
            .unwrap_or(false),
        _ => false,
    }
}

// =============================================================================
// Command Mounter
// =============================================================================

/// Mounter backed by the host's mount utilities
#[derive(Debug, Clone, Default)]
pub struct CommandMounter;

impl CommandMounter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mounter for CommandMounter {
    async fn make_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let mut cmd = Command::new("mount");
        cmd.arg("-t").arg(fs_type);
        if !options.is_empty() {
            cmd.arg("-o").arg(options.join(","));
        }
        cmd.arg(source).arg(target);

        debug!("Running mount -t {} {} {}", fs_type, source, target.display());

        let output = cmd.output().await.map_err(|e| Error::Mount {
            source_path: source.to_string(),
            target: target.display().to_string(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(Error::Mount {
                source_path: source.to_string(),
                target: target.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let output = Command::new("umount")
            .arg(target)
            .output()
            .await
            .map_err(|e| Error::Unmount {
                target: target.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::Unmount {
                target: target.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn is_likely_not_mount_point(&self, path: &Path) -> Result<bool> {
        let meta = tokio::fs::metadata(path).await?;
        let parent = path.parent().unwrap_or(path);
        let parent_meta = tokio::fs::metadata(parent).await?;
        Ok(meta.dev() == parent_meta.dev())
    }

    async fn path_exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    fn is_corrupted_mount(&self, err: &Error) -> bool {
        is_corrupted_io(err)
    }
}

// =============================================================================
// Symlink Mounter
// =============================================================================

/// Simulated mounter: a mount replaces the (empty) target directory with a
/// symlink into `root`, unmount restores the empty directory.
///
/// Sources of the form `host@tcp:/path` resolve to `root/host/path`, so a
/// sub-path created through one mount is visible through a mount of that
/// sub-path.
#[derive(Debug, Clone)]
pub struct SymlinkMounter {
    root: PathBuf,
}

impl SymlinkMounter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local directory standing in for `source`
    pub fn backing_dir(&self, source: &str) -> PathBuf {
        let (host, path) = source.split_once("@tcp:").unwrap_or(("local", source));
        let mut dir = self.root.join(host);
        for part in path.split('/').filter(|p| !p.is_empty() && *p != "..") {
            dir.push(part);
        }
        dir
    }
}

#[async_trait]
impl Mounter for SymlinkMounter {
    async fn make_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        _fs_type: &str,
        _options: &[String],
    ) -> Result<()> {
        let backing = self.backing_dir(source);
        let mount_err = |reason: String| Error::Mount {
            source_path: source.to_string(),
            target: target.display().to_string(),
            reason,
        };

        tokio::fs::create_dir_all(&backing)
            .await
            .map_err(|e| mount_err(e.to_string()))?;
        tokio::fs::remove_dir(target)
            .await
            .map_err(|e| mount_err(format!("target not an empty directory: {}", e)))?;
        tokio::fs::symlink(&backing, target)
            .await
            .map_err(|e| mount_err(e.to_string()))?;

        debug!("Simulated mount {} -> {}", target.display(), backing.display());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let unmount_err = |reason: String| Error::Unmount {
            target: target.display().to_string(),
            reason,
        };

        let meta = tokio::fs::symlink_metadata(target)
            .await
            .map_err(|e| unmount_err(e.to_string()))?;
        if !meta.file_type().is_symlink() {
            return Err(unmount_err("not mounted".into()));
        }

        tokio::fs::remove_file(target)
            .await
            .map_err(|e| unmount_err(e.to_string()))?;
        tokio::fs::create_dir(target)
            .await
            .map_err(|e| unmount_err(e.to_string()))?;
        Ok(())
    }

    async fn is_likely_not_mount_point(&self, path: &Path) -> Result<bool> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        Ok(!meta.file_type().is_symlink())
    }

    async fn path_exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::symlink_metadata(path).await.is_ok())
    }

    fn is_corrupted_mount(&self, err: &Error) -> bool {
        is_corrupted_io(err)
    }
}
