//! Policy-wrapped views over the tree.
//!
//! A [`SecurityPolicy`] is a stateless interception point with exactly four
//! override points; [`PolicyView`] is a non-owning wrapper that routes node
//! operations through one. Every node a view returns is re-wrapped with the
//! same policy, so policy application is transitive down the whole visible
//! subtree. A view always wraps a raw [`Node`], never another view, which
//! makes re-wrapping with the same policy a no-op in effect.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::ContentStream;
use crate::node::Node;
use crate::VfsResult;

/// Pluggable interception point for node operations.
///
/// All four methods default to pass-through. Implementations must be
/// stateless with respect to individual nodes; one policy value is shared
/// by every view derived from a wrapped root.
#[async_trait]
pub trait SecurityPolicy: Send + Sync {
    /// Called in response to [`PolicyView::open`].
    async fn open(&self, node: &Node) -> VfsResult<ContentStream> {
        node.open().await
    }

    /// Called in response to [`PolicyView::add`].
    fn add(&self, parent: &Node, child: Node) {
        parent.add(child);
    }

    /// Called in response to [`PolicyView::list`].
    fn list(&self, node: &Node) -> Vec<Node> {
        node.list()
    }

    /// Called in response to [`PolicyView::get`] with the raw lookup
    /// result; may substitute or suppress it.
    fn get(&self, node: Option<Node>) -> Option<Node> {
        node
    }
}

/// The default policy: every operation passes straight through.
pub struct Passthrough;

#[async_trait]
impl SecurityPolicy for Passthrough {}

/// A policy that rejects mutation: `add` is dropped (and logged), reads
/// pass through.
pub struct ReadOnly;

#[async_trait]
impl SecurityPolicy for ReadOnly {
    fn add(&self, parent: &Node, child: Node) {
        tracing::debug!(
            parent = parent.name(),
            child = child.name(),
            "rejected add on read-only view"
        );
    }
}

/// A non-owning, policy-routed view of a node.
#[derive(Clone)]
pub struct PolicyView {
    node: Node,
    policy: Arc<dyn SecurityPolicy>,
}

impl PolicyView {
    /// Wrap a node with a policy.
    pub fn new(node: Node, policy: Arc<dyn SecurityPolicy>) -> Self {
        Self { node, policy }
    }

    /// Wrap a node with the pass-through policy.
    pub fn passthrough(node: Node) -> Self {
        Self::new(node, Arc::new(Passthrough))
    }

    fn wrap(&self, node: Node) -> PolicyView {
        PolicyView {
            node,
            policy: Arc::clone(&self.policy),
        }
    }

    /// The underlying raw node.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Entry name.
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Whether the wrapped node is a directory.
    pub fn is_dir(&self) -> bool {
        self.node.is_dir()
    }

    /// Size, as reported by the wrapped node.
    pub fn len(&self) -> u64 {
        self.node.len()
    }

    /// True when the wrapped node reports zero size.
    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }

    /// Last modification time.
    pub fn modified(&self) -> SystemTime {
        self.node.modified()
    }

    /// Owning user name.
    pub fn owner(&self) -> &str {
        self.node.owner()
    }

    /// Owning group name.
    pub fn group(&self) -> &str {
        self.node.group()
    }

    /// Policy-routed single-segment lookup.
    pub fn get(&self, name: &str) -> Option<PolicyView> {
        self.policy
            .get(self.node.get(name))
            .map(|node| self.wrap(node))
    }

    /// Multi-segment resolution; the result is re-wrapped.
    pub fn query(&self, path: &str) -> Option<PolicyView> {
        self.node.query(path).map(|node| self.wrap(node))
    }

    /// The parent, re-wrapped.
    pub fn parent(&self) -> Option<PolicyView> {
        self.node.parent().map(|node| self.wrap(node))
    }

    /// Policy-routed child listing; every entry is re-wrapped.
    pub fn list(&self) -> Vec<PolicyView> {
        self.policy
            .list(&self.node)
            .into_iter()
            .map(|node| self.wrap(node))
            .collect()
    }

    /// Recursive search; results are re-wrapped.
    pub fn find(&self, search: &str) -> Vec<PolicyView> {
        self.node
            .find(search)
            .into_iter()
            .map(|node| self.wrap(node))
            .collect()
    }

    /// Policy-routed content access.
    pub async fn open(&self) -> VfsResult<ContentStream> {
        self.policy.open(&self.node).await
    }

    /// Policy-routed attach of a raw node under the wrapped one.
    pub fn add(&self, child: Node) {
        self.policy.add(&self.node, child);
    }

    /// Notify the wrapped node's subscribers of a created/replaced node.
    pub fn notify_modified(&self, node: &Node) {
        self.node.notify_modified(node);
    }
}

impl std::fmt::Debug for PolicyView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyView").field("node", &self.node).finish()
    }
}
