//! Tar archive content handler.
//!
//! Recognizes `.tar`, `.tar.gz` and `.tgz` files and expands their entries
//! into a synthetic in-memory subtree, creating intermediate directories
//! as entry paths demand. The loader inlines the result at the position of
//! the archive file.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::backends::memory::MemoryNode;
use crate::loader::ContentHandler;
use crate::node::Node;
use crate::VfsResult;

enum ArchiveKind {
    Plain,
    Gzipped,
}

impl ArchiveKind {
    fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tar") {
            Some(Self::Plain)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzipped)
        } else {
            None
        }
    }
}

/// Content handler that inlines tar archives as virtual directories.
pub struct TarHandler;

impl ContentHandler for TarHandler {
    fn expand(&self, path: &Path) -> VfsResult<Option<Vec<Node>>> {
        let Some(kind) = ArchiveKind::detect(path) else {
            return Ok(None);
        };
        let reader = BufReader::new(File::open(path)?);
        let nodes = match kind {
            ArchiveKind::Plain => read_entries(tar::Archive::new(reader)),
            ArchiveKind::Gzipped => read_entries(tar::Archive::new(GzDecoder::new(reader))),
        }?;
        Ok(Some(nodes))
    }
}

fn read_entries<R: Read>(mut archive: tar::Archive<R>) -> VfsResult<Vec<Node>> {
    // Staging root; the caller merges its children into the real tree.
    let root = MemoryNode::dir("");
    for entry in archive.entries()? {
        let mut entry = entry?;
        let components: Vec<String> = entry
            .path()?
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let Some((leaf, dirs)) = components.split_last() else {
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            dir_at(&root, &components);
        } else if kind.is_file() {
            let modified = SystemTime::UNIX_EPOCH
                + Duration::from_secs(entry.header().mtime().unwrap_or(0));
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            let node = Node::new(
                MemoryNode::new(leaf.clone(), Some(content)).with_modified(modified),
            );
            dir_at(&root, dirs).add(node);
        }
        // Links and metadata entries are skipped.
    }
    Ok(root.list())
}

/// Walk (and create) intermediate directories under `root`.
fn dir_at(root: &Node, components: &[String]) -> Node {
    let mut dir = root.clone();
    for name in components {
        dir = match dir.get(name) {
            Some(existing) => existing,
            None => {
                let sub = MemoryNode::dir(name.clone());
                dir.add(sub.clone());
                sub
            }
        };
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn tar_bytes() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in [
            ("readme.txt", "hello"),
            ("src/lib.rs", "pub fn f() {}"),
            ("src/nested/deep.txt", "deep"),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn expands_entries_with_intermediate_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.tar");
        std::fs::write(&path, tar_bytes()).unwrap();

        let nodes = TarHandler.expand(&path).unwrap().unwrap();
        let root = MemoryNode::dir("staging");
        root.add_all(nodes);

        assert!(root.query("readme.txt").is_some());
        assert!(root.query("src").unwrap().is_dir());
        assert!(root.query("src/lib.rs").is_some());
        assert_eq!(root.query("src/nested/deep.txt").unwrap().len(), 4);
    }

    #[test]
    fn expands_gzipped_archives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.tar.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let nodes = TarHandler.expand(&path).unwrap().unwrap();
        assert!(!nodes.is_empty());
    }

    #[test]
    fn declines_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"not an archive").unwrap();

        assert!(TarHandler.expand(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar");
        std::fs::write(&path, b"definitely not a tar archive").unwrap();

        assert!(TarHandler.expand(&path).is_err());
    }
}
