//! Scratch mounts
//!
//! Shared-filesystem volumes are created and removed by mounting the shared
//! filesystem at a throwaway local path, working inside it, then unmounting
//! and removing the path. Every invocation uses a fresh path, so unrelated
//! sequences can run in parallel.

use crate::domain::ports::MounterRef;
use crate::error::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Scratch mount settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchConfig {
    /// Directory the scratch mount points are created in
    pub root: PathBuf,
    pub fs_type: String,
    pub mount_options: Vec<String>,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/fsx-volume-driver/scratch"),
            fs_type: "lustre".to_string(),
            mount_options: Vec::new(),
        }
    }
}

/// Runs work inside temporary mounts of a shared filesystem
pub struct ScratchMounter {
    mounter: MounterRef,
    config: ScratchConfig,
}

impl ScratchMounter {
    pub fn new(mounter: MounterRef, config: ScratchConfig) -> Self {
        Self { mounter, config }
    }

    pub fn config(&self) -> &ScratchConfig {
        &self.config
    }

    /// Mount `source` at a fresh scratch path, run `work` with that path,
    /// then unmount and remove the path.
    ///
    /// The sequence runs on its own task: dropping the returned future
    /// (operation deadline, disconnected client) does not interrupt it, so
    /// the mount is always torn down. Removal of the scratch directory is
    /// attempted on every exit path. A cleanup failure is logged and never
    /// replaces an earlier error; if everything else succeeded it is
    /// returned.
    pub async fn with_scratch_mount<T, F, Fut>(&self, source: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mounter = self.mounter.clone();
        let config = self.config.clone();
        let source = source.to_string();

        let sequence =
            tokio::spawn(async move { run_sequence(&mounter, &config, &source, work).await });

        match sequence.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("scratch mount task failed: {}", e))),
        }
    }
}

async fn run_sequence<T, F, Fut>(
    mounter: &MounterRef,
    config: &ScratchConfig,
    source: &str,
    work: F,
) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let scratch = config.root.join(format!("scratch-{}", Uuid::new_v4()));

    let result = mount_and_run(mounter, config, source, &scratch, work).await;

    // remove_dir, not remove_dir_all: a still-mounted path must never
    // have its contents deleted
    let removed = tokio::fs::remove_dir(&scratch).await;

    match (result, removed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(Error::Internal(format!(
            "failed to remove scratch mount point {}: {}",
            scratch.display(),
            e
        ))),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove scratch mount point {}: {}",
                    scratch.display(),
                    cleanup
                );
            }
            Err(e)
        }
    }
}

async fn mount_and_run<T, F, Fut>(
    mounter: &MounterRef,
    config: &ScratchConfig,
    source: &str,
    scratch: &Path,
    work: F,
) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    mounter.make_dir(scratch).await?;
    mounter
        .mount(source, scratch, &config.fs_type, &config.mount_options)
        .await?;
    debug!("Mounted {} at scratch {}", source, scratch.display());

    let result = work(scratch.to_path_buf()).await;

    match (result, mounter.unmount(scratch).await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(unmount)) => {
            warn!("Failed to unmount scratch {}: {}", scratch.display(), unmount);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SymlinkMounter;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn scratch_in(dir: &Path) -> ScratchMounter {
        ScratchMounter::new(
            Arc::new(SymlinkMounter::new(dir.join("backing"))),
            ScratchConfig {
                root: dir.join("scratch"),
                ..Default::default()
            },
        )
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("scratch"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_work_runs_inside_mount() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch_in(dir.path());

        scratch
            .with_scratch_mount("fs-1@tcp:/mnt1", |root| async move {
                tokio::fs::create_dir(root.join("pvc-1")).await?;
                Ok::<_, Error>(())
            })
            .await
            .unwrap();

        assert!(dir.path().join("backing/fs-1/mnt1/pvc-1").is_dir());
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_cleanup_after_failed_work() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch_in(dir.path());

        let err = scratch
            .with_scratch_mount("fs-1@tcp:/mnt1", |_| async move {
                Err::<(), _>(Error::Internal("boom".into()))
            })
            .await
            .unwrap_err();

        assert_matches!(err, Error::Internal(msg) if msg == "boom");
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_parallel_sequences_use_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = Arc::new(scratch_in(dir.path()));

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let scratch = scratch.clone();
                tokio::spawn(async move {
                    scratch
                        .with_scratch_mount("fs-1@tcp:/mnt1", move |root| async move {
                            tokio::fs::create_dir(root.join(format!("pvc-{}", i))).await?;
                            Ok::<_, Error>(root)
                        })
                        .await
                })
            })
            .collect();

        let mut roots: Vec<PathBuf> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        roots.sort();
        roots.dedup();
        assert_eq!(roots.len(), 4);
        assert_eq!(scratch_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_dropped_sequence_still_unmounts() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch_in(dir.path());

        let work_done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done = work_done.clone();
        let cut_short = tokio::time::timeout(
            Duration::from_millis(20),
            scratch.with_scratch_mount("fs-1@tcp:/mnt1", move |root| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                tokio::fs::create_dir(root.join("pvc-1")).await?;
                done.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, Error>(())
            }),
        )
        .await;
        assert!(cut_short.is_err());
        assert_eq!(scratch_entries(dir.path()), 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while scratch_entries(dir.path()) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(scratch_entries(dir.path()), 0);
        assert!(work_done.load(std::sync::atomic::Ordering::SeqCst));
        assert!(dir.path().join("backing/fs-1/mnt1/pvc-1").is_dir());
    }
}
