//! The backend contract every node producer implements.
//!
//! Disk files, archive entries, database rows and synthetic in-memory
//! content all conform to this one trait; the tree engine and the protocol
//! servers depend only on its shape.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::SystemTime;
use tokio::io::AsyncRead;

/// Path separator used throughout the virtual namespace.
pub const SEPARATOR: &str = "/";

/// Readable byte stream produced by a backend.
pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

/// A producer of node content and metadata.
///
/// Backends are interchangeable: the engine never downcasts. Directories
/// are expected to fail `open` with [`VfsError::IsADirectory`].
///
/// [`VfsError::IsADirectory`]: crate::VfsError::IsADirectory
#[async_trait]
pub trait NodeBackend: Send + Sync {
    /// Entry name, without separators.
    fn name(&self) -> &str;

    /// Whether this entry is a directory.
    fn is_dir(&self) -> bool;

    /// Byte length of the content. Ignored for directories (the tree
    /// reports child count instead).
    fn len(&self) -> u64;

    /// Last modification time.
    fn modified(&self) -> SystemTime;

    /// Owning user name, as shown in directory listings.
    fn owner(&self) -> &str {
        default_user()
    }

    /// Owning group name, as shown in directory listings.
    fn group(&self) -> &str {
        default_user()
    }

    /// Open the content for reading.
    async fn open(&self) -> crate::VfsResult<ContentStream>;
}

/// Fallback owner/group: the process user, or "nobody".
pub(crate) fn default_user() -> &'static str {
    static USER: OnceLock<String> = OnceLock::new();
    USER.get_or_init(|| std::env::var("USER").unwrap_or_else(|_| "nobody".into()))
}
