use std::collections::HashMap;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use thiserror::Error;

use crate::listing::FileRecord;

/// Index into the arena. Uses u32 to save memory (supports up to ~4 billion nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single file or directory inside a volume, stored in a flat arena.
/// Uses sibling-list representation: each node has `first_child` and `next_sibling`.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// Last path segment (empty for the root)
    pub name: CompactString,
    /// Full `/`-joined path relative to the volume root (empty for the root)
    pub path: CompactString,
    /// Size in bytes. For files: reported size. For dirs: `own_size` plus children
    /// once sizes have been aggregated.
    pub size: u64,
    /// Bytes contributed by this node itself. 0 for synthesized directories.
    pub own_size: u64,
    pub is_dir: bool,
    /// Created implicitly as an ancestor of another record and not described yet
    pub synthesized: bool,
    pub mode: CompactString,
    pub owner: CompactString,
    pub group: CompactString,
    pub modified_at: DateTime<Utc>,
    /// Parent node index (None for root)
    pub parent: Option<NodeId>,
    /// First child node index (None for files / empty dirs)
    pub first_child: Option<NodeId>,
    /// Next sibling node index (None if last child)
    pub next_sibling: Option<NodeId>,
    /// Depth in the tree (root = 0)
    pub depth: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("path '{0}' does not exist in the tree")]
    PathNotFound(String),
}

/// What a successful [`FileTree::delete`] took out of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Removal {
    /// Nodes removed from the index (the target and all its descendants)
    pub nodes: usize,
    /// Size of the target node, subtracted from every ancestor
    pub bytes: u64,
}

/// The reconstructed contents of one volume.
///
/// Nodes live in a flat arena; `index` maps every reachable path to its slot.
/// Deleted slots are left vacant and never reused, so a stale [`NodeId`]
/// resolves to `None` instead of aliasing a newer node.
#[derive(Debug, Clone)]
pub struct FileTree {
    nodes: Vec<Option<FileNode>>,
    /// Root node index
    pub root: NodeId,
    index: HashMap<CompactString, NodeId>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// Create an empty tree with a root node.
    pub fn new() -> Self {
        let root_node = FileNode {
            name: CompactString::default(),
            path: CompactString::default(),
            size: 0,
            own_size: 0,
            is_dir: true,
            synthesized: false,
            mode: CompactString::default(),
            owner: CompactString::default(),
            group: CompactString::default(),
            modified_at: Utc::now(),
            parent: None,
            first_child: None,
            next_sibling: None,
            depth: 0,
        };

        let mut index = HashMap::new();
        index.insert(CompactString::default(), NodeId(0));

        FileTree {
            nodes: vec![Some(root_node)],
            root: NodeId(0),
            index,
        }
    }

    /// Insert a record, creating any missing ancestor directories on the way.
    ///
    /// Missing ancestors are synthesized as directories with size 0 that borrow
    /// the record's mode, owner, group and timestamp. A path that is already
    /// described keeps its attributes; a synthesized directory is completed by
    /// the first record naming it.
    pub fn insert(&mut self, record: &FileRecord) -> NodeId {
        let segments: Vec<&str> = record.path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = self.root;
        let mut full_path = CompactString::default();

        for (i, segment) in segments.iter().enumerate() {
            if !full_path.is_empty() {
                full_path.push('/');
            }
            full_path.push_str(segment);
            let is_last = i == segments.len() - 1;

            let existing = self.index.get(&full_path).copied();
            current = match existing {
                Some(existing) => {
                    if is_last {
                        self.complete(existing, record);
                    }
                    existing
                }
                None => {
                    let node = FileNode {
                        name: CompactString::new(segment),
                        path: full_path.clone(),
                        size: if is_last { record.size } else { 0 },
                        own_size: if is_last { record.size } else { 0 },
                        is_dir: if is_last { record.is_dir } else { true },
                        synthesized: !is_last,
                        mode: record.mode.clone(),
                        owner: record.owner.clone(),
                        group: record.group.clone(),
                        modified_at: record.modified_at,
                        parent: None,
                        first_child: None,
                        next_sibling: None,
                        depth: 0, // will be set by add_child
                    };
                    let id = self.add_child(current, node);
                    self.index.insert(full_path.clone(), id);
                    id
                }
            };
        }

        current
    }

    /// Fill in a synthesized directory from the record that describes it.
    fn complete(&mut self, id: NodeId, record: &FileRecord) {
        let Some(node) = self.get_mut(id) else {
            return;
        };
        if !node.synthesized {
            return;
        }
        node.synthesized = false;
        node.is_dir = record.is_dir || node.first_child.is_some();
        node.size = node.size.saturating_sub(node.own_size) + record.size;
        node.own_size = record.size;
        node.mode = record.mode.clone();
        node.owner = record.owner.clone();
        node.group = record.group.clone();
        node.modified_at = record.modified_at;
    }

    /// Add a child node under the given parent. Returns the new node's ID.
    fn add_child(&mut self, parent: NodeId, mut node: FileNode) -> NodeId {
        let new_id = NodeId(self.nodes.len() as u32);
        node.parent = Some(parent);

        // Prepend to parent's child list (O(1))
        if let Some(parent_node) = self.get_mut(parent) {
            node.depth = parent_node.depth + 1;
            node.next_sibling = parent_node.first_child;
            parent_node.first_child = Some(new_id);
        }

        self.nodes.push(Some(node));
        new_id
    }

    /// Remove `path` and everything below it, shrinking every ancestor by the
    /// removed node's size.
    ///
    /// Deleting the root path `""` empties the tree but keeps the root itself.
    pub fn delete(&mut self, path: &str) -> Result<Removal, TreeError> {
        let target = self
            .lookup(path)
            .ok_or_else(|| TreeError::PathNotFound(path.to_string()))?;

        if target == self.root {
            let children: Vec<NodeId> = self.children(target).collect();
            let removed: usize = children.into_iter().map(|child| self.purge(child)).sum();
            let mut bytes = 0;
            if let Some(root) = self.get_mut(target) {
                bytes = root.size.saturating_sub(root.own_size);
                root.first_child = None;
                root.size = root.own_size;
            }
            tracing::debug!("Emptied tree: {} nodes, {} bytes", removed, bytes);
            return Ok(Removal {
                nodes: removed,
                bytes,
            });
        }

        let (parent, bytes) = match self.get(target) {
            Some(node) => (node.parent, node.size),
            None => return Err(TreeError::PathNotFound(path.to_string())),
        };

        if let Some(parent) = parent {
            self.unlink(parent, target);
        }
        let removed = self.purge(target);

        let mut current = parent;
        while let Some(id) = current {
            let Some(node) = self.get_mut(id) else {
                break;
            };
            node.size = node.size.saturating_sub(bytes);
            current = node.parent;
        }

        tracing::debug!("Deleted {}: {} nodes, {} bytes", path, removed, bytes);
        Ok(Removal {
            nodes: removed,
            bytes,
        })
    }

    /// Detach `child` from `parent`'s sibling list.
    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        let next = self.get(child).and_then(|n| n.next_sibling);
        let first = self.get(parent).and_then(|n| n.first_child);

        if first == Some(child) {
            if let Some(p) = self.get_mut(parent) {
                p.first_child = next;
            }
            return;
        }

        let mut cursor = first;
        while let Some(id) = cursor {
            let sibling = self.get(id).and_then(|n| n.next_sibling);
            if sibling == Some(child) {
                if let Some(n) = self.get_mut(id) {
                    n.next_sibling = next;
                }
                return;
            }
            cursor = sibling;
        }
    }

    /// Vacate `start` and all its descendants, children before parents.
    /// Uses an explicit stack to avoid stack overflow on deep paths.
    fn purge(&mut self, start: NodeId) -> usize {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id));
        }

        for &id in order.iter().rev() {
            if let Some(node) = self.nodes[id.index()].take() {
                self.index.remove(&node.path);
            }
        }
        order.len()
    }

    /// Get a live node by ID.
    pub fn get(&self, id: NodeId) -> Option<&FileNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Get a mutable live node by ID.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut FileNode> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Resolve a volume-relative path. The empty path is the root.
    /// Empty segments are ignored, the same way `insert` splits paths.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let trimmed = path.trim_matches('/');
        if !trimmed.contains("//") {
            return self.index.get(trimmed).copied();
        }
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        self.index.get(segments.join("/").as_str()).copied()
    }

    /// The node at `path`, if any.
    pub fn node(&self, path: &str) -> Option<&FileNode> {
        self.lookup(path).and_then(|id| self.get(id))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Number of indexed nodes, root included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the tree is empty (only root).
    pub fn is_empty(&self) -> bool {
        self.index.len() <= 1
    }

    /// Aggregated size of the whole volume.
    pub fn total_size(&self) -> u64 {
        self.get(self.root).map_or(0, |n| n.size)
    }

    /// All indexed paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(CompactString::as_str)
    }

    /// Iterate over live nodes with their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &FileNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i as u32), n)))
    }

    /// Iterate over children of a node.
    pub fn children(&self, parent: NodeId) -> ChildIter<'_> {
        ChildIter {
            tree: self,
            current: self.get(parent).and_then(|n| n.first_child),
        }
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Option<FileNode>] {
        &mut self.nodes
    }

    pub(crate) fn nodes(&self) -> &[Option<FileNode>] {
        &self.nodes
    }
}

/// Iterator over the children of a node.
pub struct ChildIter<'a> {
    tree: &'a FileTree,
    current: Option<NodeId>,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.current?;
        self.current = self.tree.get(id).and_then(|n| n.next_sibling);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, size: u64, is_dir: bool) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size,
            is_dir,
            mode: CompactString::new(if is_dir { "drwxr-xr-x" } else { "-rw-r--r--" }),
            owner: CompactString::new("user"),
            group: CompactString::new("group"),
            modified_at: DateTime::from_timestamp(1633024800, 0).unwrap(),
        }
    }

    /// Every indexed node is reachable from the root and vice versa.
    fn assert_consistent(tree: &FileTree) {
        let mut reachable = 0;
        let mut stack = vec![tree.root];
        while let Some(id) = stack.pop() {
            let node = tree.get(id).unwrap();
            assert_eq!(tree.lookup(&node.path), Some(id), "{}", node.path);
            reachable += 1;
            for child in tree.children(id) {
                assert_eq!(tree.get(child).unwrap().parent, Some(id));
                stack.push(child);
            }
        }
        assert_eq!(reachable, tree.len());
        assert_eq!(tree.iter().count(), tree.len());
    }

    #[test]
    fn new_tree_has_only_root() {
        let tree = FileTree::new();
        assert_eq!(tree.len(), 1);
        assert!(tree.is_empty());
        assert!(tree.contains(""));
        assert!(tree.get(tree.root).unwrap().is_dir);
    }

    #[test]
    fn insert_creates_intermediate_directories() {
        let mut tree = FileTree::new();
        let id = tree.insert(&record("dir1/sub/file.txt", 1024, false));

        assert!(tree.contains("dir1"));
        assert!(tree.contains("dir1/sub"));
        let file = tree.get(id).unwrap();
        assert_eq!(file.path, "dir1/sub/file.txt");
        assert_eq!(file.name, "file.txt");
        assert_eq!(file.size, 1024);
        assert_eq!(file.depth, 3);

        let dir = tree.node("dir1").unwrap();
        assert!(dir.is_dir);
        assert!(dir.synthesized);
        assert_eq!(dir.size, 0);
        assert_eq!(dir.mode, "-rw-r--r--");
        assert_consistent(&tree);
    }

    #[test]
    fn existing_path_keeps_first_attributes() {
        let mut tree = FileTree::new();
        let first = tree.insert(&record("a.txt", 10, false));
        let mut again = record("a.txt", 99, false);
        again.owner = CompactString::new("someone-else");
        let second = tree.insert(&again);

        assert_eq!(first, second);
        let node = tree.get(first).unwrap();
        assert_eq!(node.size, 10);
        assert_eq!(node.owner, "user");
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn late_directory_record_completes_synthesized_node() {
        let mut tree = FileTree::new();
        tree.insert(&record("dir1/a.txt", 1024, false));
        let mut dir = record("dir1", 4096, true);
        dir.owner = CompactString::new("root");
        tree.insert(&dir);

        let node = tree.node("dir1").unwrap();
        assert!(!node.synthesized);
        assert_eq!(node.owner, "root");
        assert_eq!(node.mode, "drwxr-xr-x");
        assert_eq!(node.own_size, 4096);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn empty_and_slashy_paths() {
        let mut tree = FileTree::new();
        assert_eq!(tree.insert(&record("", 4096, true)), tree.root);
        assert_eq!(tree.len(), 1);

        tree.insert(&record("/a//b/", 1, false));
        assert!(tree.contains("a/b"));
        assert!(tree.contains("/a/b/"));
        assert!(tree.contains("a//b"));
        assert_eq!(tree.lookup("//a///b"), tree.lookup("a/b"));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn delete_accepts_doubled_slashes() {
        let mut tree = FileTree::new();
        tree.insert(&record("dir1/a.txt", 1024, false));
        tree.insert(&record("dir1/b.txt", 2048, false));
        tree.compute_directory_sizes();

        let removal = tree.delete("/dir1//a.txt").unwrap();
        assert_eq!(removal.bytes, 1024);
        assert!(!tree.contains("dir1/a.txt"));
        assert_eq!(tree.total_size(), 2048);
    }

    #[test]
    fn delete_missing_path_leaves_tree_untouched() {
        let mut tree = FileTree::new();
        tree.insert(&record("dir1/a.txt", 1024, false));
        let before: Vec<String> = {
            let mut p: Vec<String> = tree.paths().map(str::to_string).collect();
            p.sort();
            p
        };

        assert_eq!(
            tree.delete("dir1/missing.txt"),
            Err(TreeError::PathNotFound("dir1/missing.txt".into()))
        );

        let mut after: Vec<String> = tree.paths().map(str::to_string).collect();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn delete_removes_subtree_and_shrinks_ancestors() {
        let mut tree = FileTree::new();
        tree.insert(&record("a/b/c/one", 100, false));
        tree.insert(&record("a/b/c/two", 200, false));
        tree.insert(&record("a/b/three", 400, false));
        tree.insert(&record("a/keep", 800, false));
        tree.compute_directory_sizes();
        assert_eq!(tree.total_size(), 1500);

        let stale = tree.lookup("a/b/c/one").unwrap();
        let removal = tree.delete("a/b").unwrap();

        assert_eq!(removal, Removal { nodes: 5, bytes: 700 });
        assert!(!tree.contains("a/b"));
        assert!(!tree.contains("a/b/c"));
        assert!(!tree.contains("a/b/c/one"));
        assert!(tree.get(stale).is_none());
        assert_eq!(tree.node("a").unwrap().size, 800);
        assert_eq!(tree.total_size(), 800);
        assert_eq!(tree.children(tree.lookup("a").unwrap()).count(), 1);
        assert_consistent(&tree);
    }

    #[test]
    fn delete_middle_sibling_keeps_others_linked() {
        let mut tree = FileTree::new();
        for name in ["x", "y", "z"] {
            tree.insert(&record(&format!("d/{name}"), 1, false));
        }
        tree.compute_directory_sizes();
        tree.delete("d/y").unwrap();

        let d = tree.lookup("d").unwrap();
        let mut names: Vec<_> = tree
            .children(d)
            .map(|id| tree.get(id).unwrap().name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["x", "z"]);
        assert_eq!(tree.get(d).unwrap().size, 2);
        assert_consistent(&tree);
    }

    #[test]
    fn reinsert_after_delete_starts_clean() {
        let mut tree = FileTree::new();
        tree.insert(&record("d/old", 5, false));
        tree.delete("d").unwrap();
        tree.insert(&record("d/new", 7, false));
        tree.compute_directory_sizes();

        assert!(!tree.contains("d/old"));
        assert_eq!(tree.node("d").unwrap().size, 7);
        assert_consistent(&tree);
    }

    #[test]
    fn deleting_root_purges_descendants_only() {
        let mut tree = FileTree::new();
        tree.insert(&record("a/b", 10, false));
        tree.insert(&record("c", 20, false));
        tree.compute_directory_sizes();

        let removal = tree.delete("").unwrap();
        assert_eq!(removal.nodes, 3);
        assert_eq!(removal.bytes, 30);
        assert_eq!(tree.len(), 1);
        assert!(tree.contains(""));
        assert_eq!(tree.total_size(), 0);
        assert_eq!(tree.children(tree.root).count(), 0);
        assert_consistent(&tree);
    }
}
