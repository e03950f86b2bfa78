//! Missing-node resolver chain.
//!
//! Resolvers are fallback producers consulted when a single-segment lookup
//! misses. They are configured per engine instance at construction and
//! apply to every node reachable from that root — there is no process-wide
//! registry.

use std::sync::Arc;

use crate::node::Node;

/// Fallback producer consulted on lookup miss.
///
/// Resolvers run in registration order; the first `Some` wins. A resolver
/// must be pure with respect to the tree: it may synthesize a node but must
/// not mutate existing ones.
pub trait MissingNodeResolver: Send + Sync {
    /// Attempt to produce the named child of `parent`.
    fn resolve(&self, parent: &Node, name: &str) -> Option<Node>;
}

/// Engine-level configuration, supplied when constructing a root node.
#[derive(Default, Clone)]
pub struct TreeOptions {
    /// Resolvers consulted in order on lookup miss.
    pub resolvers: Vec<Arc<dyn MissingNodeResolver>>,
}

impl TreeOptions {
    /// Empty configuration: no resolvers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver to the chain.
    pub fn resolver(mut self, resolver: Arc<dyn MissingNodeResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}
