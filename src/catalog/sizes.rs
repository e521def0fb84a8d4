use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;

use crate::config::DEFAULT_SIZE_TTL;
use crate::listing::DEFAULT_MOUNT_POINT;
use crate::runtime::{is_valid_volume_name, shell_quote, SandboxExecutor, SandboxMount};

/// Value reported for a volume whose size could not be determined.
pub const UNKNOWN_SIZE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeMode {
    /// `du -h` style tokens such as `4.0K` or `1.2G`
    Human,
    /// Plain integer byte counts of disk usage, measured by `du -sk` and
    /// scaled by 1024. Usage is block-rounded, so this is not the apparent
    /// size of the files and is always a multiple of 1024.
    Bytes,
}

impl SizeMode {
    fn du_flags(self) -> &'static str {
        match self {
            SizeMode::Human => "-sh",
            // busybox du has no byte mode; KiB are scaled back up in `parse_size_line`
            SizeMode::Bytes => "-sk",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeQueryError {
    #[error("invalid volume name {0:?}")]
    InvalidVolumeName(String),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    size: String,
    fetched_at: Instant,
}

/// Volume sizes with a time-to-live.
///
/// Sizes come from `du` run in a sandbox, which is slow, so every request
/// collects the volumes that are missing or stale and refreshes them all with a
/// single sandbox. Stale entries are only replaced when they are asked for.
#[derive(Debug, Clone)]
pub struct SizeCache {
    ttl: Duration,
    mount_point: String,
    entries: HashMap<(SizeMode, String), CacheEntry>,
}

impl Default for SizeCache {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_TTL)
    }
}

impl SizeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Directory under which each batched volume is mounted as `<dir>/<name>`.
    pub fn with_mount_point(mut self, mount_point: &str) -> Self {
        self.mount_point = mount_point.trim_end_matches('/').to_string();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a size as freshly fetched.
    pub fn insert(&mut self, volume: &str, mode: SizeMode, size: &str) {
        self.entries.insert(
            (mode, volume.to_string()),
            CacheEntry {
                size: size.to_string(),
                fetched_at: Instant::now(),
            },
        );
    }

    /// Forget every cached size of `volume`.
    pub fn invalidate(&mut self, volume: &str) {
        self.entries.retain(|(_, name), _| name != volume);
    }

    /// Size of a single volume.
    pub fn size<E>(&mut self, executor: &E, volume: &str, mode: SizeMode) -> Result<String, SizeQueryError>
    where
        E: SandboxExecutor + ?Sized,
    {
        let mut sizes = self.sizes(executor, &[volume], mode)?;
        Ok(sizes.remove(volume).unwrap_or_else(|| UNKNOWN_SIZE.to_string()))
    }

    /// Sizes of several volumes, keyed by name.
    ///
    /// Fresh cache entries are returned as is; everything else is fetched in
    /// one sandbox run. Duplicate names are resolved once.
    pub fn sizes<E, S>(
        &mut self,
        executor: &E,
        volumes: &[S],
        mode: SizeMode,
    ) -> Result<BTreeMap<String, String>, SizeQueryError>
    where
        E: SandboxExecutor + ?Sized,
        S: AsRef<str>,
    {
        if let Some(bad) = volumes
            .iter()
            .map(AsRef::as_ref)
            .find(|name| !is_valid_volume_name(name))
        {
            return Err(SizeQueryError::InvalidVolumeName(bad.to_string()));
        }

        let mut result = BTreeMap::new();
        let mut batch: Vec<&str> = Vec::new();
        for name in volumes.iter().map(AsRef::as_ref) {
            if result.contains_key(name) || batch.contains(&name) {
                continue;
            }
            match self.entries.get(&(mode, name.to_string())) {
                Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                    result.insert(name.to_string(), entry.size.clone());
                }
                _ => batch.push(name),
            }
        }

        if !batch.is_empty() {
            tracing::debug!(
                "Size cache: {} hit(s), querying {} volume(s)",
                result.len(),
                batch.len()
            );
            result.extend(self.refresh(executor, &batch, mode));
        }

        Ok(result)
    }

    /// Run one `du` over every volume in `batch` and store the results.
    fn refresh<E>(&mut self, executor: &E, batch: &[&str], mode: SizeMode) -> Vec<(String, String)>
    where
        E: SandboxExecutor + ?Sized,
    {
        let mounts: Vec<SandboxMount> = batch
            .iter()
            .map(|name| SandboxMount::read_only(name, &format!("{}/{}", self.mount_point, name)))
            .collect();
        let targets: Vec<String> = mounts.iter().map(|m| shell_quote(&m.target)).collect();
        let command = format!("du {} {}", mode.du_flags(), targets.join(" "));

        let output = match executor.run_in_sandbox(&command, &mounts) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Size query for {} volume(s) failed: {}", batch.len(), e);
                // Keep whatever we knew; the entries stay stale so the next call retries.
                return batch
                    .iter()
                    .map(|name| {
                        let known = self
                            .entries
                            .get(&(mode, name.to_string()))
                            .map_or_else(|| UNKNOWN_SIZE.to_string(), |e| e.size.clone());
                        (name.to_string(), known)
                    })
                    .collect();
            }
        };

        let fetched_at = Instant::now();
        let mut lines = output.lines();
        batch
            .iter()
            .map(|name| {
                let line = lines.next();
                let size = line.and_then(|l| parse_size_line(l, mode)).unwrap_or_else(|| {
                    tracing::warn!("No usable size for volume {}: {:?}", name, line);
                    UNKNOWN_SIZE.to_string()
                });
                self.entries.insert(
                    (mode, name.to_string()),
                    CacheEntry {
                        size: size.clone(),
                        fetched_at,
                    },
                );
                (name.to_string(), size)
            })
            .collect()
    }
}

/// First whitespace-separated token of a `du` line, if it is a size.
fn parse_size_line(line: &str, mode: SizeMode) -> Option<String> {
    static HUMAN: OnceLock<Regex> = OnceLock::new();
    let token = line.split_whitespace().next()?;
    match mode {
        SizeMode::Human => {
            let pattern =
                HUMAN.get_or_init(|| Regex::new(r"^\d+(\.\d+)?[KMGTP]?$").expect("valid regex"));
            pattern.is_match(token).then(|| token.to_string())
        }
        SizeMode::Bytes => {
            let kib: u64 = token.parse().ok()?;
            Some(kib.saturating_mul(1024).to_string())
        }
    }
}
