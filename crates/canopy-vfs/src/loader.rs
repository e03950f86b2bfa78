//! Concurrent bulk loader.
//!
//! Mirrors a host directory tree into the namespace. The walk itself is
//! strictly sequential and attaches directory structure as it goes; only
//! per-file content detection runs concurrently, on a bounded pool. A full
//! join barrier separates detection from the merge phase, so merges never
//! race against in-flight detections.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::backends::DiskNode;
use crate::node::Node;
use crate::VfsResult;

/// Detector that recognizes a file's bytes as a nested filesystem and
/// expands it into child nodes.
///
/// Every registered handler runs against every regular file; `None` means
/// "no match". All matching handlers contribute — results are merged, not
/// first-match-wins.
pub trait ContentHandler: Send + Sync {
    /// Expand `path` into nodes, or decline with `None`.
    fn expand(&self, path: &Path) -> VfsResult<Option<Vec<Node>>>;
}

/// Bulk loader for host directory trees.
pub struct Loader {
    handlers: Vec<Arc<dyn ContentHandler>>,
    workers: usize,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    /// A loader with no content handlers and one detection worker per
    /// available core.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }

    /// Register a content handler.
    pub fn handler(mut self, handler: Arc<dyn ContentHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Bound the detection pool. The resulting tree is identical for any
    /// worker count; only wall-clock time changes.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Load `dir` into a fresh node mirroring it.
    pub async fn load(&self, dir: &Path) -> VfsResult<Node> {
        let root = Node::new(DiskNode::new(dir)?);
        self.populate(&root, dir).await?;
        Ok(root)
    }

    /// Load the children of `dir` beneath an existing node.
    pub async fn populate(&self, target: &Node, dir: &Path) -> VfsResult<()> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut detections = Vec::new();
        self.walk(target, dir, &semaphore, &mut detections)?;

        // Barrier: every detection joins before any merge runs.
        let mut results = Vec::new();
        for task in detections {
            match task.await {
                Ok(outcome) => results.push(outcome),
                Err(err) => tracing::warn!(%err, "detection task panicked"),
            }
        }
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recursive load complete"
        );

        for (parent, produced) in results {
            for node in produced {
                merge(node, &parent);
            }
        }
        Ok(())
    }

    /// Sequential depth-first walk. Directory structure becomes visible
    /// incrementally; file detection is submitted and not waited on here.
    fn walk(
        &self,
        parent: &Node,
        dir: &Path,
        semaphore: &Arc<Semaphore>,
        detections: &mut Vec<JoinHandle<(Node, Vec<Node>)>>,
    ) -> VfsResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(%err, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            let node = match DiskNode::new(&path) {
                Ok(backend) => Node::new(backend),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping entry");
                    continue;
                }
            };
            parent.add(node.clone());

            if node.is_dir() {
                self.walk(&node, &path, semaphore, detections)?;
            } else if !self.handlers.is_empty() {
                let handlers = self.handlers.clone();
                let target = parent.clone();
                let semaphore = Arc::clone(semaphore);
                detections.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let produced = tokio::task::spawn_blocking(move || {
                        run_handlers(&handlers, &path)
                    })
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(%err, "content handler panicked");
                        Vec::new()
                    });
                    (target, produced)
                }));
            }
        }
        Ok(())
    }
}

/// Run every handler against one file; errors count as "no match".
fn run_handlers(handlers: &[Arc<dyn ContentHandler>], path: &Path) -> Vec<Node> {
    let mut produced = Vec::new();
    for handler in handlers {
        match handler.expand(path) {
            Ok(Some(nodes)) => produced.extend(nodes),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "content handler failed");
            }
        }
    }
    produced
}

/// Merge one node into a directory.
///
/// A same-named child recurses into grandchildren instead of overwriting;
/// duplicate leaves are silently dropped. Merging the same result set
/// twice therefore yields the same child set as merging it once.
pub fn merge(src: Node, target: &Node) {
    match target.get(src.name()) {
        Some(existing) => {
            for child in src.list() {
                merge(child, &existing);
            }
        }
        None => target.add(src),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryNode;

    fn names(node: &Node) -> Vec<String> {
        let mut names: Vec<_> = node.list().iter().map(|n| n.name().to_owned()).collect();
        names.sort();
        names
    }

    #[test]
    fn merge_attaches_new_nodes() {
        let target = MemoryNode::dir("target");
        let src = MemoryNode::dir("sub");
        src.add(MemoryNode::file("a.txt", "a"));

        merge(src, &target);
        assert_eq!(names(&target), ["sub"]);
        assert!(target.query("sub/a.txt").is_some());
    }

    #[test]
    fn merge_recurses_into_existing_directories() {
        let target = MemoryNode::dir("target");
        let existing = MemoryNode::dir("sub");
        existing.add(MemoryNode::file("old.txt", "old"));
        target.add(existing);

        let src = MemoryNode::dir("sub");
        src.add(MemoryNode::file("new.txt", "new"));
        merge(src, &target);

        assert_eq!(names(&target.get("sub").unwrap()), ["new.txt", "old.txt"]);
    }

    #[test]
    fn merge_drops_duplicate_leaves() {
        let target = MemoryNode::dir("target");
        let keep = MemoryNode::file("a.txt", "keep");
        target.add(keep.clone());

        merge(MemoryNode::file("a.txt", "dropped"), &target);
        assert!(target.get("a.txt").unwrap().ptr_eq(&keep));
    }

    #[test]
    fn merge_is_idempotent() {
        let build = || {
            let src = MemoryNode::dir("sub");
            src.add(MemoryNode::file("a.txt", "a"));
            let nested = MemoryNode::dir("nested");
            nested.add(MemoryNode::file("b.txt", "b"));
            src.add(nested);
            src
        };

        let target = MemoryNode::dir("target");
        merge(build(), &target);
        let first: Vec<_> = names(&target.get("sub").unwrap());

        merge(build(), &target);
        assert_eq!(names(&target.get("sub").unwrap()), first);
        assert_eq!(target.list().len(), 1);
    }
}
