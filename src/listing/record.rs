use chrono::{DateTime, Utc};
use compact_str::CompactString;
use thiserror::Error;

/// Number of `|`-separated fields in one listing line:
/// `type|path|size|mode|user|group|mtime`.
pub const FIELD_COUNT: usize = 7;

/// One entry of a remote listing, before it is placed in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the volume root, without a leading separator
    pub path: String,
    /// Size in bytes as reported by `stat`
    pub size: u64,
    /// Whether this entry is a directory
    pub is_dir: bool,
    /// Permission string, e.g. `drwxr-xr-x`
    pub mode: CompactString,
    pub owner: CompactString,
    pub group: CompactString,
    pub modified_at: DateTime<Utc>,
}

/// Why a single listing line was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("expected {} fields, found {found}", FIELD_COUNT)]
    FieldCount { found: usize },
    #[error("invalid size field: {0:?}")]
    InvalidSize(String),
    #[error("invalid modification time: {0:?}")]
    InvalidTimestamp(String),
}

/// Parse one `type|path|size|mode|user|group|mtime` line.
///
/// `strip_prefix` is the sandbox mount point; it is removed from the path when
/// it matches whole path components, then any leading `/` is trimmed.
pub fn parse_line(line: &str, strip_prefix: &str) -> Result<FileRecord, MalformedRecord> {
    let fields: Vec<&str> = line.split('|').collect();
    let &[kind, path, size, mode, owner, group, mtime] = fields.as_slice() else {
        return Err(MalformedRecord::FieldCount {
            found: fields.len(),
        });
    };

    let size: u64 = size
        .trim()
        .parse()
        .map_err(|_| MalformedRecord::InvalidSize(size.to_string()))?;

    let modified_at = mtime
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| MalformedRecord::InvalidTimestamp(mtime.to_string()))?;

    Ok(FileRecord {
        path: strip_mount_prefix(path, strip_prefix).to_string(),
        size,
        is_dir: kind == "directory",
        mode: CompactString::new(mode),
        owner: CompactString::new(owner),
        group: CompactString::new(group),
        modified_at,
    })
}

fn strip_mount_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    let rest = match path.strip_prefix(prefix) {
        Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };
    rest.trim_start_matches('/')
}
