use std::collections::{BTreeMap, HashMap};

use remotefs_core::{CallId, FileMetadata, FileType, paths};

use super::node_ref::{NodeRef, NodeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Listing progress of a folder. Only `Loaded` children are authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Listing,
    Loaded,
}

#[derive(Debug)]
pub struct MirrorNode {
    parent: Option<NodeId>,
    meta: FileMetadata,
    load: LoadState,
    provisional: bool,
    children: BTreeMap<String, NodeId>,
    buffer: Option<Vec<u8>>,
    pending_list: Option<CallId>,
    pending_buffer: Option<CallId>,
}

impl MirrorNode {
    fn new(parent: Option<NodeId>, meta: FileMetadata, provisional: bool) -> Self {
        Self {
            parent,
            meta,
            load: LoadState::Unloaded,
            provisional,
            children: BTreeMap::new(),
            buffer: None,
            pending_list: None,
            pending_buffer: None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn meta(&self) -> &FileMetadata {
        &self.meta
    }

    pub fn path(&self) -> &str {
        &self.meta.path
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn kind(&self) -> FileType {
        self.meta.file_type
    }

    pub fn is_dir(&self) -> bool {
        self.meta.file_type.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.meta.file_type.is_file()
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn is_loaded(&self) -> bool {
        self.load == LoadState::Loaded
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    pub fn pending_list(&self) -> Option<CallId> {
        self.pending_list
    }

    pub fn pending_buffer(&self) -> Option<CallId> {
        self.pending_buffer
    }

    pub fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }
}

/// Arena holding the mirror. Parents own children through the arena; a
/// child only keeps its parent's id.
#[derive(Debug)]
pub struct MirrorTree {
    nodes: HashMap<NodeId, MirrorNode>,
    root: NodeId,
    next_id: u64,
}

impl MirrorTree {
    pub fn new(root_path: &str) -> Self {
        let root_path = paths::normalize(root_path);
        let mut tree = Self {
            nodes: HashMap::new(),
            root: NodeId(0),
            next_id: 0,
        };
        let root = tree.insert(None, FileMetadata::new(root_path, FileType::Dir), false);
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &str {
        self.nodes[&self.root].path()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&MirrorNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        let parts = self.relative_parts(path)?;
        let mut current = self.root;
        for part in &parts {
            current = self.child_by_name(current, part)?;
        }
        debug_assert_eq!(self.nodes[&current].path(), paths::normalize(path));
        Some(current)
    }

    /// Deepest existing node on `path`; `None` when the path is outside the
    /// mirrored namespace.
    pub fn closest_node(&self, path: &str) -> Option<NodeId> {
        let parts = self.relative_parts(path)?;
        let mut current = self.root;
        for part in &parts {
            match self.child_by_name(current, part) {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current)
    }

    /// Deepest node on `path` whose children are authoritative. Falls back to
    /// the root, so it always terminates with a node.
    pub fn closest_loaded_ancestor(&self, path: &str) -> NodeId {
        let Some(parts) = self.relative_parts(path) else {
            return self.root;
        };
        let mut current = self.root;
        let mut loaded = self.root;
        for part in &parts {
            let Some(next) = self.child_by_name(current, part) else {
                break;
            };
            current = next;
            if self.nodes[&current].is_loaded() {
                loaded = current;
            }
        }
        loaded
    }

    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes.get(&id)?.children.get(name).copied()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.child_ids().collect())
            .unwrap_or_default()
    }

    pub fn is_ancestor(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        let mut current = self.nodes.get(&descendant).and_then(|node| node.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent);
        }
        false
    }

    pub fn snapshot(&self, id: NodeId) -> NodeRef {
        self.nodes
            .get(&id)
            .map(|node| NodeRef::capture(&node.meta))
            .unwrap_or_else(NodeRef::nil)
    }

    pub fn state(&self, id: NodeId) -> NodeState {
        let Some(node) = self.nodes.get(&id) else {
            return NodeState::NonExtant;
        };
        if node.provisional {
            return NodeState::Provisional;
        }
        match node.kind() {
            FileType::File if node.buffer.is_some() => NodeState::FileBufferLoaded,
            FileType::File if node.pending_buffer.is_some() => NodeState::FileBufferLoading,
            FileType::File => NodeState::FileKnown,
            FileType::Dir => match node.load {
                LoadState::Unloaded => NodeState::FolderUnloaded,
                LoadState::Listing => NodeState::FolderListing,
                LoadState::Loaded => NodeState::FolderLoaded,
            },
            FileType::Unknown => NodeState::Unknown,
        }
    }

    /// Applies a listing reply for `id`.
    ///
    /// Children missing from `entries` are destroyed, unchanged children keep
    /// their ids, and provisional children named in the listing are replaced
    /// by freshly confirmed nodes. An entry whose path is the node's own path
    /// updates the node itself.
    pub fn set_children(&mut self, id: NodeId, entries: Vec<FileMetadata>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let own_path = node.meta.path.clone();

        let mut listed = BTreeMap::new();
        for entry in entries {
            let entry_path = paths::normalize(&entry.path);
            if entry_path == own_path || entry.name == "." {
                self.update_own(id, &entry);
                continue;
            }
            let name = if entry.name.is_empty() {
                paths::file_name(&entry_path).unwrap_or_default().to_string()
            } else {
                entry.name.clone()
            };
            if paths::validate_name(&name).is_err() {
                continue;
            }
            listed.insert(name, entry);
        }

        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.provisional = false;
        if !node.is_dir() {
            return;
        }

        let vanished: Vec<NodeId> = node
            .children
            .iter()
            .filter(|(name, _)| !listed.contains_key(*name))
            .map(|(_, child)| *child)
            .collect();
        for child in vanished {
            self.delete_subtree(child);
        }
        for (name, entry) in listed {
            self.merge_child(id, name, entry);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.load = LoadState::Loaded;
        }
    }

    pub fn set_buffer(&mut self, id: NodeId, bytes: Vec<u8>) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.is_file() => {
                node.buffer = Some(bytes);
                true
            }
            _ => false,
        }
    }

    /// Destroys `id` and everything below it. The root cannot be deleted;
    /// its contents are cleared instead.
    pub fn delete_subtree(&mut self, id: NodeId) -> usize {
        if id == self.root {
            return self.clear_contents(id);
        }
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        let name = node.meta.name.clone();
        let parent = node.parent;
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.remove(&name);
        }
        self.remove_detached(id)
    }

    /// Drops the known contents of a folder and marks it unloaded.
    pub fn clear_contents(&mut self, id: NodeId) -> usize {
        let Some(node) = self.nodes.get_mut(&id) else {
            return 0;
        };
        let children: Vec<NodeId> = std::mem::take(&mut node.children).into_values().collect();
        if node.is_dir() {
            node.load = LoadState::Unloaded;
        }
        children
            .into_iter()
            .map(|child| self.remove_detached(child))
            .sum()
    }

    /// Adds a placeholder entry under a folder that is not loaded yet.
    pub fn insert_provisional(&mut self, parent: NodeId, name: &str, kind: FileType) -> Option<NodeId> {
        paths::validate_name(name).ok()?;
        let parent_node = self.nodes.get(&parent)?;
        if !parent_node.is_dir() || parent_node.is_loaded() || parent_node.children.contains_key(name) {
            return None;
        }
        let meta = FileMetadata::new(paths::join(parent_node.path(), name), kind);
        Some(self.attach(parent, name.to_string(), meta, true))
    }

    pub(crate) fn begin_listing(&mut self, id: NodeId, call: CallId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.pending_list = Some(call);
            if node.load == LoadState::Unloaded && node.is_dir() {
                node.load = LoadState::Listing;
            }
        }
    }

    /// Clears the listing marker if `call` is the outstanding listing.
    pub(crate) fn end_listing(&mut self, id: NodeId, call: CallId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.pending_list == Some(call) => {
                node.pending_list = None;
                if node.load == LoadState::Listing {
                    node.load = LoadState::Unloaded;
                }
                true
            }
            _ => false,
        }
    }

    /// Forgets the outstanding listing of `id` so its reply is treated as
    /// stale. The load state is left for the next `begin_listing`.
    pub(crate) fn supersede_listing(&mut self, id: NodeId) -> Option<CallId> {
        self.nodes.get_mut(&id)?.pending_list.take()
    }

    pub(crate) fn begin_buffer(&mut self, id: NodeId, call: CallId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.pending_buffer = Some(call);
        }
    }

    pub(crate) fn end_buffer(&mut self, id: NodeId, call: CallId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.pending_buffer == Some(call) => {
                node.pending_buffer = None;
                true
            }
            _ => false,
        }
    }

    fn relative_parts(&self, path: &str) -> Option<Vec<String>> {
        let path = paths::normalize(path);
        let root = self.root_path();
        let rest = if root == "/" {
            path.as_str()
        } else if path == root {
            ""
        } else {
            path.strip_prefix(root)?.strip_prefix('/')?
        };
        Some(paths::segments(rest).map(str::to_string).collect())
    }

    fn insert(&mut self, parent: Option<NodeId>, meta: FileMetadata, provisional: bool) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, MirrorNode::new(parent, meta, provisional));
        id
    }

    fn attach(&mut self, parent: NodeId, name: String, mut meta: FileMetadata, provisional: bool) -> NodeId {
        meta.path = paths::join(self.nodes[&parent].path(), &name);
        meta.name = name.clone();
        let id = self.insert(Some(parent), meta, provisional);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.insert(name, id);
        }
        id
    }

    fn update_own(&mut self, id: NodeId, entry: &FileMetadata) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let kind_changed = node.meta.file_type != entry.file_type;
        if kind_changed || node.meta.modified != entry.modified || node.meta.size != entry.size {
            node.buffer = None;
        }
        node.meta.file_type = entry.file_type;
        node.meta.size = entry.size;
        node.meta.modified = entry.modified;
        if kind_changed && !node.is_dir() {
            self.clear_contents(id);
        }
    }

    fn merge_child(&mut self, parent: NodeId, name: String, entry: FileMetadata) {
        let Some(existing) = self.child_by_name(parent, &name) else {
            self.attach(parent, name, entry, false);
            return;
        };
        let (provisional, kind) = {
            let old = &self.nodes[&existing];
            (old.provisional, old.kind())
        };
        if provisional {
            self.replace_provisional(parent, existing, name, entry);
            return;
        }
        if kind != entry.file_type {
            self.delete_subtree(existing);
            self.attach(parent, name, entry, false);
            return;
        }
        if let Some(node) = self.nodes.get_mut(&existing) {
            if node.meta.modified != entry.modified || node.meta.size != entry.size {
                node.buffer = None;
            }
            node.meta.size = entry.size;
            node.meta.modified = entry.modified;
        }
    }

    fn replace_provisional(&mut self, parent: NodeId, old_id: NodeId, name: String, entry: FileMetadata) {
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return;
        };
        parent_node.children.remove(&name);
        let Some(old) = self.nodes.remove(&old_id) else {
            return;
        };
        let same_kind = old.kind() == entry.file_type;
        let new_id = self.attach(parent, name, entry, false);

        let mut orphans = Vec::new();
        if let Some(node) = self.nodes.get_mut(&new_id) {
            node.pending_list = old.pending_list;
            node.pending_buffer = old.pending_buffer;
            if same_kind && node.is_dir() {
                node.load = old.load;
                node.children = old.children;
            } else {
                if same_kind {
                    node.buffer = old.buffer;
                }
                orphans.extend(old.children.into_values());
            }
        }
        for child in self.children(new_id) {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = Some(new_id);
            }
        }
        for orphan in orphans {
            self.remove_detached(orphan);
        }
    }

    fn remove_detached(&mut self, id: NodeId) -> usize {
        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                removed += 1;
                stack.extend(node.children.into_values());
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, modified: i64) -> FileMetadata {
        FileMetadata::new(path, FileType::File)
            .with_size(2)
            .with_modified(modified)
    }

    fn dir(path: &str) -> FileMetadata {
        FileMetadata::new(path, FileType::Dir)
    }

    fn seeded() -> MirrorTree {
        let mut tree = MirrorTree::new("/alice");
        tree.set_children(
            tree.root(),
            vec![dir("/alice/a"), file("/alice/b.txt", 100)],
        );
        tree
    }

    #[test]
    fn resolve_matches_listed_paths_only() {
        let tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        assert_eq!(tree.node(a).unwrap().path(), "/alice/a");
        assert_eq!(tree.resolve("/alice/b.txt/").map(|id| tree.node(id).unwrap().path()), Some("/alice/b.txt"));
        assert!(tree.resolve("/alice/c").is_none());
        assert!(tree.resolve("/bob").is_none());
        assert_eq!(tree.resolve("/alice"), Some(tree.root()));
    }

    #[test]
    fn relisting_keeps_unchanged_children_and_drops_vanished() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        let b = tree.resolve("/alice/b.txt").unwrap();

        tree.set_children(tree.root(), vec![dir("/alice/a"), dir("/alice/new")]);

        assert_eq!(tree.resolve("/alice/a"), Some(a));
        assert!(tree.resolve("/alice/b.txt").is_none());
        assert!(!tree.contains(b));
        assert!(tree.resolve("/alice/new").is_some());
    }

    #[test]
    fn changed_timestamp_drops_cached_buffer() {
        let mut tree = seeded();
        let b = tree.resolve("/alice/b.txt").unwrap();
        assert!(tree.set_buffer(b, b"hi".to_vec()));

        tree.set_children(tree.root(), vec![dir("/alice/a"), file("/alice/b.txt", 100)]);
        assert_eq!(tree.node(b).unwrap().buffer(), Some(&b"hi"[..]));

        tree.set_children(tree.root(), vec![dir("/alice/a"), file("/alice/b.txt", 200)]);
        assert_eq!(tree.resolve("/alice/b.txt"), Some(b));
        assert_eq!(tree.node(b).unwrap().buffer(), None);
    }

    #[test]
    fn kind_change_replaces_node() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        tree.set_children(a, vec![file("/alice/a/x", 1)]);

        tree.set_children(tree.root(), vec![file("/alice/a", 5), file("/alice/b.txt", 100)]);

        let replaced = tree.resolve("/alice/a").unwrap();
        assert_ne!(replaced, a);
        assert_eq!(tree.node(replaced).unwrap().kind(), FileType::File);
        assert!(tree.resolve("/alice/a/x").is_none());
    }

    #[test]
    fn delete_subtree_removes_all_descendants() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        tree.set_children(a, vec![dir("/alice/a/s")]);
        let s = tree.resolve("/alice/a/s").unwrap();
        tree.set_children(s, vec![file("/alice/a/s/deep.txt", 1)]);
        let before = tree.len();

        assert_eq!(tree.delete_subtree(a), 3);

        assert_eq!(tree.len(), before - 3);
        assert!(tree.resolve("/alice/a/s/deep.txt").is_none());
        assert!(tree.resolve("/alice/a").is_none());
    }

    #[test]
    fn closest_loaded_ancestor_stops_at_deepest_loaded_folder() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        assert_eq!(tree.closest_loaded_ancestor("/alice/a/x/y"), tree.root());

        tree.set_children(a, vec![dir("/alice/a/x")]);
        assert_eq!(tree.closest_loaded_ancestor("/alice/a/x/y"), a);
        assert_eq!(tree.closest_loaded_ancestor("/elsewhere"), tree.root());
    }

    #[test]
    fn provisional_nodes_only_under_unloaded_folders() {
        let mut tree = seeded();
        assert!(tree.insert_provisional(tree.root(), "ghost", FileType::Dir).is_none());

        let a = tree.resolve("/alice/a").unwrap();
        let p = tree.insert_provisional(a, "up", FileType::Dir).unwrap();
        assert_eq!(tree.node(p).unwrap().path(), "/alice/a/up");
        assert_eq!(tree.state(p), NodeState::Provisional);
    }

    #[test]
    fn listing_replaces_provisional_child_and_carries_markers() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        let p = tree.insert_provisional(a, "up", FileType::Dir).unwrap();
        tree.begin_listing(p, CallId(7));
        let q = tree.insert_provisional(p, "inner.txt", FileType::File).unwrap();

        tree.set_children(a, vec![dir("/alice/a/up")]);

        let confirmed = tree.resolve("/alice/a/up").unwrap();
        assert_ne!(confirmed, p);
        assert!(!tree.contains(p));
        let node = tree.node(confirmed).unwrap();
        assert!(!node.is_provisional());
        assert_eq!(node.pending_list(), Some(CallId(7)));
        assert_eq!(tree.resolve("/alice/a/up/inner.txt"), Some(q));
        assert_eq!(tree.node(q).unwrap().parent(), Some(confirmed));
    }

    #[test]
    fn listing_without_provisional_name_removes_it() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        tree.insert_provisional(a, "up", FileType::Dir).unwrap();

        tree.set_children(a, Vec::new());

        assert!(tree.resolve("/alice/a/up").is_none());
        assert!(tree.node(a).unwrap().is_loaded());
    }

    #[test]
    fn listing_markers_follow_load_state() {
        let mut tree = seeded();
        let a = tree.resolve("/alice/a").unwrap();
        tree.begin_listing(a, CallId(1));
        assert_eq!(tree.state(a), NodeState::FolderListing);

        assert!(!tree.end_listing(a, CallId(2)));
        assert!(tree.end_listing(a, CallId(1)));
        assert_eq!(tree.state(a), NodeState::FolderUnloaded);
    }

    #[test]
    fn own_entry_updates_node_metadata() {
        let mut tree = seeded();
        let b = tree.resolve("/alice/b.txt").unwrap();

        tree.set_children(b, vec![file("/alice/b.txt", 300)]);

        assert_eq!(tree.node(b).unwrap().meta().modified, Some(300));
    }
}
