pub mod aggregate;
pub mod arena;

pub use self::aggregate::{compute_directory_sizes, largest_files, sort_children_by_size};
pub use self::arena::{ChildIter, FileNode, FileTree, NodeId, Removal, TreeError};

use crate::listing::FileRecord;

/// Build a FileTree from a flat list of records and aggregate directory sizes.
pub fn build_tree<'a, I>(records: I) -> FileTree
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let mut tree = FileTree::new();
    let mut dir_count = 0usize;
    let mut file_count = 0usize;

    for record in records {
        if record.is_dir {
            dir_count += 1;
        } else {
            file_count += 1;
        }
        tree.insert(record);
    }

    tree.compute_directory_sizes();

    tracing::debug!(
        "Tree built from {} records ({} dirs, {} files): {} nodes, {} bytes",
        dir_count + file_count,
        dir_count,
        file_count,
        tree.len(),
        tree.total_size()
    );

    tree
}

/// Human readable size with binary units, e.g. `3.0 KiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
