//! Synthetic in-memory nodes.
//!
//! Used for uploads, directory creation, archive expansion and tests. All
//! data is ephemeral.

use async_trait::async_trait;
use std::io::Cursor;
use std::time::SystemTime;

use crate::backend::{ContentStream, NodeBackend};
use crate::node::Node;
use crate::{VfsError, VfsResult};

/// In-memory backend: a name plus optional content.
///
/// No content means the node is a directory, mirroring how synthetic
/// nodes are created by uploads (`STOR` carries text) and `MKD` (none).
pub struct MemoryNode {
    name: String,
    content: Option<Vec<u8>>,
    modified: SystemTime,
}

impl MemoryNode {
    /// Create a backend value. `None` content makes a directory.
    pub fn new(name: impl Into<String>, content: Option<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content,
            modified: SystemTime::now(),
        }
    }

    /// Override the modification time (archive entries carry their own).
    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    /// Convenience: an attached-ready file node.
    pub fn file(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Node {
        Node::new(Self::new(name, Some(content.into())))
    }

    /// Convenience: an attached-ready directory node.
    pub fn dir(name: impl Into<String>) -> Node {
        Node::new(Self::new(name, None))
    }
}

#[async_trait]
impl NodeBackend for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dir(&self) -> bool {
        self.content.is_none()
    }

    fn len(&self) -> u64 {
        self.content.as_ref().map_or(0, |c| c.len() as u64)
    }

    fn modified(&self) -> SystemTime {
        self.modified
    }

    async fn open(&self) -> VfsResult<ContentStream> {
        match &self.content {
            Some(bytes) => Ok(Box::pin(Cursor::new(bytes.clone()))),
            None => Err(VfsError::is_a_directory(self.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn file_content_round_trip() {
        let node = MemoryNode::file("hello.txt", "hello");
        assert!(!node.is_dir());
        assert_eq!(node.len(), 5);

        let mut buf = Vec::new();
        node.open().await.unwrap().read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn directory_refuses_open() {
        let node = MemoryNode::dir("folder");
        assert!(node.is_dir());
        assert!(matches!(
            node.open().await,
            Err(VfsError::IsADirectory(_))
        ));
    }
}
