//! The tree engine: nodes, path resolution, concurrent mutation.
//!
//! A [`Node`] is a cheap clone-able handle onto one entry of the virtual
//! namespace. Children live in a per-node map guarded by an exclusive
//! write lock; batch mutations hold the lock for the whole batch, reads
//! take a snapshot and may observe a concurrent batch either fully applied
//! or not at all. The namespace is advisory, not transactional.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::backend::{ContentStream, NodeBackend, SEPARATOR};
use crate::resolve::{MissingNodeResolver, TreeOptions};
use crate::VfsResult;

/// Observer of tree mutations.
///
/// Subscribers are notified explicitly by whoever performs the change
/// (e.g. the FTP engine after an upload); the tree does not fire events on
/// its own.
pub trait ChangeListener: Send + Sync {
    /// A node was added beneath the subscribed node.
    fn file_added(&self, _node: &Node) {}

    /// A node beneath the subscribed node was created or replaced.
    fn file_modified(&self, _node: &Node) {}

    /// A node was removed from beneath the subscribed node.
    fn file_removed(&self, _node: &Node) {}
}

struct NodeInner {
    backend: Arc<dyn NodeBackend>,
    children: RwLock<HashMap<String, Node>>,
    /// Non-owning back-reference. The node's true owner is whichever child
    /// map currently holds it; this must never keep a subtree alive.
    parent: RwLock<Weak<NodeInner>>,
    resolvers: Vec<Arc<dyn MissingNodeResolver>>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

/// One entry (file or directory) in the virtual filesystem tree.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a detached node from a backend, with no resolver chain.
    pub fn new(backend: impl NodeBackend + 'static) -> Self {
        Self::with_options(backend, TreeOptions::default())
    }

    /// Create a detached node with engine-level options.
    ///
    /// The resolver chain applies to every node reachable from this one
    /// once it becomes the root of a tree.
    pub fn with_options(backend: impl NodeBackend + 'static, options: TreeOptions) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                backend: Arc::new(backend),
                children: RwLock::new(HashMap::new()),
                parent: RwLock::new(Weak::new()),
                resolvers: options.resolvers,
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Identity comparison: do two handles refer to the same node?
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Entry name, unique among siblings.
    pub fn name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Whether this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.inner.backend.is_dir()
    }

    /// Size: byte length for files, child count for directories.
    pub fn len(&self) -> u64 {
        if self.is_dir() {
            self.inner.children.read().len() as u64
        } else {
            self.inner.backend.len()
        }
    }

    /// True when a directory has no children or a file has no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last modification time.
    pub fn modified(&self) -> SystemTime {
        self.inner.backend.modified()
    }

    /// Owning user name.
    pub fn owner(&self) -> &str {
        self.inner.backend.owner()
    }

    /// Owning group name.
    pub fn group(&self) -> &str {
        self.inner.backend.group()
    }

    /// Open the node's content for reading.
    pub async fn open(&self) -> VfsResult<ContentStream> {
        self.inner.backend.open().await
    }

    /// The current parent, if attached.
    pub fn parent(&self) -> Option<Node> {
        self.inner
            .parent
            .read()
            .upgrade()
            .map(|inner| Node { inner })
    }

    /// Walk parent back-references to the root of this node's tree.
    pub fn root(&self) -> Node {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// Absolute path of this node within its tree; `/` for the root.
    pub fn path(&self) -> String {
        match self.parent() {
            None => SEPARATOR.to_string(),
            Some(parent) => {
                let base = parent.path();
                if base.ends_with(SEPARATOR) {
                    format!("{base}{}", self.name())
                } else {
                    format!("{base}{SEPARATOR}{}", self.name())
                }
            }
        }
    }

    /// Attach a child, keyed by its name.
    ///
    /// Move semantics: a node that already has a parent is detached from it
    /// first. An existing sibling of the same name is overwritten outright
    /// (merging is the loader's job, not the tree's).
    ///
    /// # Panics
    ///
    /// Panics if `child` is this node itself — a programmer error, not a
    /// runtime condition.
    pub fn add(&self, child: Node) {
        assert!(!self.ptr_eq(&child), "a node cannot be added to itself");
        let mut children = self.inner.children.write();
        self.attach(&mut children, child);
    }

    /// Attach several children under one lock acquisition.
    ///
    /// Readers never observe this batch interleaved with another writer's
    /// batch; they may still see it fully applied or not at all.
    pub fn add_all<I>(&self, nodes: I)
    where
        I: IntoIterator<Item = Node>,
    {
        let mut children = self.inner.children.write();
        for child in nodes {
            assert!(!self.ptr_eq(&child), "a node cannot be added to itself");
            self.attach(&mut children, child);
        }
    }

    fn attach(&self, children: &mut HashMap<String, Node>, child: Node) {
        if let Some(prev) = child.parent() {
            if !prev.ptr_eq(self) {
                prev.inner.children.write().remove(child.name());
            }
        }
        *child.inner.parent.write() = Arc::downgrade(&self.inner);
        let handle = child.clone();
        if let Some(evicted) = children.insert(child.name().to_owned(), child) {
            if !evicted.ptr_eq(&handle) {
                *evicted.inner.parent.write() = Weak::new();
            }
        }
    }

    /// Detach a child. Removal is by name; the removed node's parent
    /// back-reference is cleared.
    ///
    /// # Panics
    ///
    /// Panics if `node` is this node itself.
    pub fn remove(&self, node: &Node) {
        assert!(!self.ptr_eq(node), "a node cannot be removed from itself");
        let mut children = self.inner.children.write();
        Self::detach(&mut children, node);
    }

    /// Detach several children under one lock acquisition.
    pub fn remove_all<'a, I>(&self, nodes: I)
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let mut children = self.inner.children.write();
        for node in nodes {
            assert!(!self.ptr_eq(node), "a node cannot be removed from itself");
            Self::detach(&mut children, node);
        }
    }

    fn detach(children: &mut HashMap<String, Node>, node: &Node) {
        if let Some(removed) = children.remove(node.name()) {
            *removed.inner.parent.write() = Weak::new();
        }
    }

    /// Single-segment lookup.
    ///
    /// `"."` resolves to this node, `".."` to the parent (None at the
    /// root). On a miss the engine's resolver chain is consulted in order;
    /// the first hit wins. A miss is a normal `None`, never an error.
    pub fn get(&self, name: &str) -> Option<Node> {
        match name {
            "." => Some(self.clone()),
            ".." => self.parent(),
            _ => {
                if let Some(hit) = self.inner.children.read().get(name) {
                    return Some(hit.clone());
                }
                let root = self.root();
                for resolver in &root.inner.resolvers {
                    if let Some(hit) = resolver.resolve(self, name) {
                        return Some(hit);
                    }
                }
                None
            }
        }
    }

    /// Multi-segment resolution relative to this node.
    ///
    /// Empty and `"."` segments are dropped; `".."` pops one pending
    /// segment and can never escape above this node. Resolution stops at
    /// the first miss.
    pub fn query(&self, path: &str) -> Option<Node> {
        if !path.contains(SEPARATOR) {
            return self.get(path); // Fast path
        }
        let mut stack: Vec<&str> = Vec::new();
        for segment in path.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => {
                    stack.pop();
                }
                _ => stack.push(segment),
            }
        }
        tracing::trace!(?stack, "resolving");
        let mut node = self.clone();
        for segment in stack {
            node = node.get(segment)?;
        }
        Some(node)
    }

    /// Snapshot of the current children.
    pub fn list(&self) -> Vec<Node> {
        self.inner.children.read().values().cloned().collect()
    }

    /// Case-insensitive recursive substring search over the subtree.
    ///
    /// Directories are both matched against and recursed into.
    pub fn find(&self, search: &str) -> Vec<Node> {
        let needle = search.to_lowercase();
        let mut hits = Vec::new();
        self.find_into(&needle, &mut hits);
        hits
    }

    fn find_into(&self, needle: &str, hits: &mut Vec<Node>) {
        for child in self.list() {
            if child.name().to_lowercase().contains(needle) {
                hits.push(child.clone());
            }
            if child.is_dir() {
                child.find_into(needle, hits);
            }
        }
    }

    /// Subscribe to change notifications on this node.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Notify subscribers that `node` was added.
    pub fn notify_added(&self, node: &Node) {
        for listener in self.inner.listeners.read().iter() {
            listener.file_added(node);
        }
    }

    /// Notify subscribers that `node` was created or replaced.
    pub fn notify_modified(&self, node: &Node) {
        for listener in self.inner.listeners.read().iter() {
            listener.file_modified(node);
        }
    }

    /// Notify subscribers that `node` was removed.
    pub fn notify_removed(&self, node: &Node) {
        for listener in self.inner.listeners.read().iter() {
            listener.file_removed(node);
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("dir", &self.is_dir())
            .finish()
    }
}
