//! Reconstruction of a volume tree from the `type|path|size|mode|user|group|mtime`
//! listing produced inside the sandbox.

pub mod record;

pub use self::record::{parse_line, FileRecord, MalformedRecord};

use crate::tree::FileTree;

/// Mount point of the inspected volume inside the sandbox.
pub const DEFAULT_MOUNT_POINT: &str = "/mnt/docker_volume";

/// Shell command that emits one listing line per entry below `mount_point`.
pub fn listing_command(mount_point: &str) -> String {
    format!(
        "find {} -mindepth 1 -exec stat -c '%F|%n|%s|%A|%U|%G|%Y' {{}} +",
        mount_point
    )
}

#[derive(Debug, Clone)]
pub struct ListingOptions {
    /// Removed from the start of every listed path
    pub strip_prefix: String,
    /// Count the size `stat` reports for directory entries themselves (usually one
    /// 4 KiB block). Off by default: directories then weigh exactly their contents.
    pub count_directory_size: bool,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            strip_prefix: DEFAULT_MOUNT_POINT.to_string(),
            count_directory_size: false,
        }
    }
}

/// Result of parsing a whole listing.
#[derive(Debug, Clone)]
pub struct ParsedListing {
    pub tree: FileTree,
    /// Lines that were skipped as malformed
    pub skipped: usize,
}

/// Parse a listing with default options except for the strip prefix.
pub fn parse_listing(output: &str, strip_prefix: &str) -> FileTree {
    let options = ListingOptions {
        strip_prefix: strip_prefix.to_string(),
        ..ListingOptions::default()
    };
    parse_listing_with(output, &options).tree
}

/// Parse a listing into an aggregated tree.
///
/// Malformed lines are logged and skipped; blank lines are ignored. An empty
/// listing yields a tree holding only the root.
pub fn parse_listing_with(output: &str, options: &ListingOptions) -> ParsedListing {
    let mut parsed = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| (line, parse_line(line, &options.strip_prefix)))
        .fold(
            ParsedListing {
                tree: FileTree::new(),
                skipped: 0,
            },
            |mut acc, (line, result)| {
                match result {
                    Ok(mut record) => {
                        if record.is_dir && !options.count_directory_size {
                            record.size = 0;
                        }
                        acc.tree.insert(&record);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping malformed line: {} ({})", line, e);
                        acc.skipped += 1;
                    }
                }
                acc
            },
        );

    parsed.tree.compute_directory_sizes();

    if parsed.skipped > 0 {
        tracing::info!(
            "Parsed listing: {} nodes, {} malformed lines skipped",
            parsed.tree.len(),
            parsed.skipped
        );
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "directory|/mnt/docker_volume/dir1|4096|drwxr-xr-x|user|group|1633024800\n\
                          file|/mnt/docker_volume/dir1/file1.txt|1024|-rw-r--r--|user|group|1633024800\n\
                          file|/mnt/docker_volume/dir1/file2.txt|2048|-rw-r--r--|user|group|1633024800";

    fn sorted_paths(tree: &FileTree) -> Vec<String> {
        let mut paths: Vec<String> = tree.paths().map(str::to_string).collect();
        paths.sort();
        paths
    }

    #[test]
    fn parses_find_output() {
        let tree = parse_listing(SAMPLE, DEFAULT_MOUNT_POINT);

        assert!(tree.contains("dir1"));
        assert!(tree.contains("dir1/file1.txt"));
        assert!(tree.contains("dir1/file2.txt"));
        assert!(tree.node("dir1").unwrap().is_dir);
        assert_eq!(tree.node("dir1/file1.txt").unwrap().size, 1024);
        assert_eq!(tree.node("dir1/file2.txt").unwrap().size, 2048);
    }

    #[test]
    fn directory_weighs_its_contents() {
        let input = "directory|/mnt/v/dir1|4096|drwxr-xr-x|u|g|1633024800\n\
                     file|/mnt/v/dir1/a.txt|1024|-rw-r--r--|u|g|1633024800\n\
                     file|/mnt/v/dir1/b.txt|2048|-rw-r--r--|u|g|1633024800";
        let mut tree = parse_listing(input, "/mnt/v");

        assert_eq!(tree.node("dir1").unwrap().size, 3072);
        assert_eq!(tree.node("dir1/a.txt").unwrap().size, 1024);

        tree.delete("dir1/a.txt").unwrap();
        assert_eq!(tree.node("dir1").unwrap().size, 2048);
        assert!(!tree.contains("dir1/a.txt"));
    }

    #[test]
    fn directory_blocks_counted_when_asked() {
        let options = ListingOptions {
            strip_prefix: DEFAULT_MOUNT_POINT.to_string(),
            count_directory_size: true,
        };
        let parsed = parse_listing_with(SAMPLE, &options);
        assert_eq!(parsed.tree.node("dir1").unwrap().size, 4096 + 3072);
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn strip_prefix_yields_relative_keys() {
        let tree = parse_listing(
            "directory|/mnt/docker_volume/dir2|4096|drwxr-xr-x|user|group|1633024800",
            "/mnt/docker_volume",
        );
        let keys: Vec<String> = sorted_paths(&tree).into_iter().filter(|k| !k.is_empty()).collect();
        assert_eq!(keys, ["dir2"]);
    }

    #[test]
    fn malformed_line_is_skipped() {
        let input = "directory|/mnt/docker_volume/dir1|4096|drwxr-xr-x|user|group|1633024800\n\
                     malformed_line\n\
                     file|/mnt/docker_volume/dir1/x|notanumber|-rw-r--r--|user|group|1633024800\n\
                     file|/mnt/docker_volume/dir1/y|12|-rw-r--r--|user|group|1633024800";
        let parsed = parse_listing_with(input, &ListingOptions::default());

        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.tree.len(), 3);
        assert!(parsed.tree.contains("dir1/y"));
        assert!(!parsed.tree.contains("dir1/x"));
    }

    #[test]
    fn empty_output_is_root_only() {
        for input in ["", "\n", "   \n\n"] {
            let parsed = parse_listing_with(input, &ListingOptions::default());
            assert_eq!(parsed.tree.len(), 1);
            assert_eq!(parsed.skipped, 0);
        }
    }

    #[test]
    fn parsing_twice_gives_same_index() {
        let a = parse_listing(SAMPLE, DEFAULT_MOUNT_POINT);
        let b = parse_listing(SAMPLE, DEFAULT_MOUNT_POINT);
        assert_eq!(sorted_paths(&a), sorted_paths(&b));
        for path in a.paths() {
            assert_eq!(a.node(path).unwrap().size, b.node(path).unwrap().size);
        }
    }

    #[test]
    fn mount_root_entry_is_ignored() {
        let input = "directory|/mnt/docker_volume|4096|drwxr-xr-x|root|root|1633024800\n\
                     file|/mnt/docker_volume/a|5|-rw-r--r--|root|root|1633024800";
        let tree = parse_listing(input, DEFAULT_MOUNT_POINT);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.total_size(), 5);
    }

    #[test]
    fn listing_command_targets_mount_point() {
        let cmd = listing_command("/mnt/docker_volume");
        assert!(cmd.starts_with("find /mnt/docker_volume -mindepth 1"));
        assert!(cmd.contains("'%F|%n|%s|%A|%U|%G|%Y' {} +"));
    }
}
