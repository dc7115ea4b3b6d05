use remotefs_core::{FileMetadata, FileType};

/// Caller-side snapshot of a mirror entry.
///
/// A `NodeRef` never points into the tree. Every engine call re-resolves it
/// by path, optionally checking that the captured timestamp still matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    path: String,
    name: String,
    kind: FileType,
    size: u64,
    modified: Option<i64>,
    extant: bool,
}

impl NodeRef {
    pub fn nil() -> Self {
        Self {
            path: String::new(),
            name: String::new(),
            kind: FileType::Unknown,
            size: 0,
            modified: None,
            extant: false,
        }
    }

    pub(crate) fn capture(meta: &FileMetadata) -> Self {
        Self {
            path: meta.path.clone(),
            name: meta.name.clone(),
            kind: meta.file_type,
            size: meta.size,
            modified: meta.modified,
            extant: true,
        }
    }

    pub fn is_nil(&self) -> bool {
        !self.extant
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<i64> {
        self.modified
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::nil()
    }
}

/// What the mirror currently knows about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NonExtant,
    Provisional,
    FileKnown,
    FileBufferLoading,
    FileBufferLoaded,
    FolderUnloaded,
    FolderListing,
    FolderLoaded,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_distinct_from_any_entry() {
        let nil = NodeRef::nil();
        assert!(nil.is_nil());

        let root = NodeRef::capture(&FileMetadata::new("/", FileType::Dir));
        assert!(!root.is_nil());
        assert_ne!(nil, root);
    }

    #[test]
    fn capture_copies_metadata() {
        let meta = FileMetadata::new("/alice/b.txt", FileType::File)
            .with_size(2)
            .with_modified(100);
        let node = NodeRef::capture(&meta);
        assert_eq!(node.path(), "/alice/b.txt");
        assert_eq!(node.name(), "b.txt");
        assert_eq!(node.kind(), FileType::File);
        assert_eq!(node.size(), 2);
        assert_eq!(node.modified(), Some(100));
    }
}
