use std::cmp::Reverse;

use super::arena::{FileNode, FileTree, NodeId};

impl FileTree {
    /// See [`compute_directory_sizes`].
    pub fn compute_directory_sizes(&mut self) -> &mut Self {
        compute_directory_sizes(self);
        self
    }

    /// See [`sort_children_by_size`].
    pub fn sort_children_by_size(&mut self) -> &mut Self {
        sort_children_by_size(self);
        self
    }
}

/// Compute aggregated sizes for all directory nodes (bottom-up).
/// After this, each directory's `size` equals its own size plus the sizes of its
/// direct children. Running it again without mutations changes nothing.
pub fn compute_directory_sizes(tree: &mut FileTree) {
    // Deepest first, so every child is final before its parent is summed.
    let mut order: Vec<(u16, usize)> = tree
        .nodes()
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.as_ref().filter(|n| n.is_dir).map(|n| (n.depth, i)))
        .collect();
    order.sort_unstable_by_key(|&(depth, _)| Reverse(depth));

    let nodes = tree.nodes_mut();
    for (_, i) in order {
        let Some(node) = nodes[i].as_ref() else {
            continue;
        };

        // Sum up all direct children
        let mut total = node.own_size;
        let mut child = node.first_child;
        while let Some(child_id) = child {
            let Some(child_node) = nodes[child_id.index()].as_ref() else {
                break;
            };
            total += child_node.size;
            child = child_node.next_sibling;
        }

        if let Some(node) = nodes[i].as_mut() {
            node.size = total;
        }
    }
}

/// Sort children of each directory by size (descending, ties by name).
/// This re-links the sibling list without moving nodes in the arena.
pub fn sort_children_by_size(tree: &mut FileTree) {
    let dirs: Vec<NodeId> = tree
        .iter()
        .filter(|(_, n)| n.is_dir && n.first_child.is_some())
        .map(|(id, _)| id)
        .collect();

    for dir in dirs {
        let mut children: Vec<NodeId> = tree.children(dir).collect();
        children.sort_by(|a, b| {
            let (a, b) = (tree.get(*a), tree.get(*b));
            let key = |n: Option<&FileNode>| n.map(|n| (Reverse(n.size), n.name.clone()));
            key(a).cmp(&key(b))
        });

        // Re-link the sibling list
        let Some(&first) = children.first() else {
            continue;
        };
        if let Some(node) = tree.get_mut(dir) {
            node.first_child = Some(first);
        }
        for w in children.windows(2) {
            if let Some(node) = tree.get_mut(w[0]) {
                node.next_sibling = Some(w[1]);
            }
        }
        if let Some(node) = children.last().and_then(|&id| tree.get_mut(id)) {
            node.next_sibling = None;
        }
    }
}

/// The `limit` largest non-directory nodes, biggest first.
pub fn largest_files(tree: &FileTree, limit: usize) -> Vec<NodeId> {
    let mut files: Vec<(u64, NodeId)> = tree
        .iter()
        .filter(|(_, n)| !n.is_dir)
        .map(|(id, n)| (n.size, id))
        .collect();
    files.sort_unstable_by_key(|&(size, id)| (Reverse(size), id.0));
    files.truncate(limit);
    files.into_iter().map(|(_, id)| id).collect()
}
