//! # canopy-vfs
//!
//! A unified, hierarchical, in-memory namespace over heterogeneous
//! backends. Key components:
//!
//! - [`Node`] - Tree engine: path resolution, concurrent mutation
//! - [`NodeBackend`] - The one contract every content producer implements
//! - [`PolicyView`] - Policy-routed view over a subtree
//! - [`Loader`] - Concurrent bulk loader with archive inlining
//! - [`MemoryNode`] / [`DiskNode`] / [`TarHandler`] / [`SqliteProvider`] -
//!   the shipped backends
//!
//! ## Design Decisions
//!
//! - **Parent links are `Weak`**: a node is owned solely by whichever
//!   child map holds it; back-references can never keep a subtree alive.
//! - **Weak read consistency**: batch mutations hold a node's child-map
//!   lock for the whole batch, reads snapshot. The namespace is advisory,
//!   not transactional.
//! - **Explicit configuration**: resolver chains and content handlers are
//!   passed in at construction; there is no process-wide registry.

pub mod backend;
pub mod backends;
mod error;
pub mod loader;
mod node;
mod policy;
mod resolve;

pub use backend::{ContentStream, NodeBackend, SEPARATOR};
pub use backends::{DiskNode, MemoryNode, SqliteProvider, TarHandler};
pub use error::{VfsError, VfsResult};
pub use loader::{merge, ContentHandler, Loader};
pub use node::{ChangeListener, Node};
pub use policy::{Passthrough, PolicyView, ReadOnly, SecurityPolicy};
pub use resolve::{MissingNodeResolver, TreeOptions};
