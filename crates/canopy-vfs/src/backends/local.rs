//! Local disk backend.
//!
//! Wraps one filesystem entry. Metadata is captured when the node is
//! created (the loader snapshots a tree; it does not track the disk), but
//! content reads always go to the live file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backend::{ContentStream, NodeBackend};
use crate::{VfsError, VfsResult};

/// A node backed by a path on the host filesystem.
#[derive(Debug, Clone)]
pub struct DiskNode {
    path: PathBuf,
    name: String,
    is_dir: bool,
    len: u64,
    modified: SystemTime,
}

impl DiskNode {
    /// Capture the entry at `path`.
    pub fn new(path: impl Into<PathBuf>) -> VfsResult<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            path,
        })
    }

    /// The host path this node reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NodeBackend for DiskNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> SystemTime {
        self.modified
    }

    async fn open(&self) -> VfsResult<ContentStream> {
        if self.is_dir {
            return Err(VfsError::is_a_directory(self.name.clone()));
        }
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::pin(file))
    }
}
