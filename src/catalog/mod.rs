//! Consumer-facing view of the runtime's volumes: metadata, attachments,
//! sizes and contents, plus the destructive operations.

pub mod sizes;

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;

pub use self::sizes::{SizeCache, SizeMode, SizeQueryError, UNKNOWN_SIZE};

use crate::config::AnalyzerConfig;
use crate::listing::{self, parse_listing_with};
use crate::runtime::{is_valid_volume_name, shell_quote, ContainerRuntime, SandboxMount};
use crate::tree::{FileTree, Removal};

/// One container using a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub container_name: String,
    /// Where the volume appears inside the container
    pub mountpoint: String,
    pub driver: String,
    pub mode: String,
    pub rw: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    /// Host path reported by the runtime
    pub mountpoint: String,
    pub driver: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size: String,
    pub containers: Vec<Attachment>,
}

pub struct VolumeCatalog<R> {
    runtime: R,
    config: AnalyzerConfig,
    sizes: SizeCache,
}

impl<R: ContainerRuntime> VolumeCatalog<R> {
    pub fn new(runtime: R, config: AnalyzerConfig) -> Self {
        let sizes = SizeCache::new(config.size_ttl).with_mount_point(&config.mount_point);
        Self {
            runtime,
            config,
            sizes,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn size_cache(&mut self) -> &mut SizeCache {
        &mut self.sizes
    }

    /// Group every container's named-volume mounts by volume name.
    pub fn containers_by_volume(&self) -> Result<HashMap<String, Vec<Attachment>>> {
        let containers = self
            .runtime
            .list_containers()
            .context("failed to list containers")?;

        let mut by_volume: HashMap<String, Vec<Attachment>> = HashMap::new();
        for container in containers {
            for mount in container.mounts {
                let Some(volume) = mount.volume else {
                    continue;
                };
                by_volume.entry(volume).or_default().push(Attachment {
                    container_name: container.name.clone(),
                    mountpoint: mount.destination,
                    driver: mount.driver,
                    mode: mount.mode,
                    rw: mount.rw,
                });
            }
        }
        Ok(by_volume)
    }

    /// Every volume with its metadata, attachments and size.
    pub fn volumes(&mut self, mode: SizeMode) -> Result<BTreeMap<String, VolumeSummary>> {
        let volumes = self.runtime.list_volumes().context("failed to list volumes")?;
        let mut attachments = self.containers_by_volume()?;

        let names: Vec<&str> = volumes
            .iter()
            .map(|v| v.name.as_str())
            .filter(|name| is_valid_volume_name(name))
            .collect();
        let mut sizes = self.sizes.sizes(&self.runtime, &names, mode)?;

        tracing::info!("Listed {} volumes", volumes.len());

        Ok(volumes
            .into_iter()
            .map(|v| {
                let summary = VolumeSummary {
                    size: sizes
                        .remove(&v.name)
                        .unwrap_or_else(|| UNKNOWN_SIZE.to_string()),
                    containers: attachments.remove(&v.name).unwrap_or_default(),
                    mountpoint: v.mountpoint,
                    driver: v.driver,
                    created_at: v.created_at,
                    name: v.name.clone(),
                };
                (v.name, summary)
            })
            .collect())
    }

    /// Size of one volume, through the cache.
    pub fn volume_size(&mut self, name: &str, mode: SizeMode) -> Result<String, SizeQueryError> {
        self.sizes.size(&self.runtime, name, mode)
    }

    /// Sizes of several volumes, through the cache.
    pub fn volume_sizes<S: AsRef<str>>(
        &mut self,
        names: &[S],
        mode: SizeMode,
    ) -> Result<BTreeMap<String, String>, SizeQueryError> {
        self.sizes.sizes(&self.runtime, names, mode)
    }

    /// Force-remove a volume. Failures are logged and reported as `false`.
    pub fn remove_volume(&mut self, name: &str) -> bool {
        match self.runtime.remove_volume(name) {
            Ok(()) => {
                self.sizes.invalidate(name);
                true
            }
            Err(e) => {
                tracing::error!("Failed to remove volume '{}': {}", name, e);
                false
            }
        }
    }

    /// Full contents of a volume. A failed listing yields a tree with only the root.
    pub fn volume_tree(&self, name: &str) -> FileTree {
        if !is_valid_volume_name(name) {
            tracing::warn!("Refusing to list invalid volume name {:?}", name);
            return FileTree::new();
        }

        let mount = SandboxMount::read_only(name, &self.config.mount_point);
        let command = listing::listing_command(&self.config.mount_point);
        match self.runtime.run_in_sandbox(&command, &[mount]) {
            Ok(output) => {
                let parsed = parse_listing_with(&output, &self.config.listing_options());
                tracing::info!(
                    "Volume {}: {} entries, {} skipped",
                    name,
                    parsed.tree.len() - 1,
                    parsed.skipped
                );
                parsed.tree
            }
            Err(e) => {
                tracing::warn!("Listing volume '{}' failed: {}", name, e);
                FileTree::new()
            }
        }
    }

    /// Delete `path` (relative to the volume root) inside the volume.
    ///
    /// Only the volume changes; the caller applies [`FileTree::delete`] to any
    /// tree it holds, or uses [`Self::delete_file_and_prune`].
    pub fn delete_file(&mut self, volume: &str, path: &str) -> bool {
        self.delete_remote(volume, path).is_some()
    }

    /// Delete `path` in the volume and, if that worked, in `tree` as well.
    ///
    /// Both steps use the same normalized path, so `a//b` and `/a/b` prune the
    /// node the volume lost.
    pub fn delete_file_and_prune(&mut self, volume: &str, tree: &mut FileTree, path: &str) -> Option<Removal> {
        let relative = self.delete_remote(volume, path)?;
        match tree.delete(&relative) {
            Ok(removal) => Some(removal),
            Err(e) => {
                tracing::warn!("Deleted in volume but not in tree: {}", e);
                None
            }
        }
    }

    /// Run `rm -rf` for `path` in a writable sandbox. Returns the normalized
    /// relative path that was removed.
    fn delete_remote(&mut self, volume: &str, path: &str) -> Option<String> {
        let Some(relative) = sanitize_relative_path(path) else {
            tracing::warn!("Refusing to delete suspicious path {:?} in '{}'", path, volume);
            return None;
        };
        if !is_valid_volume_name(volume) {
            tracing::warn!("Refusing to touch invalid volume name {:?}", volume);
            return None;
        }

        let target = format!("{}/{}", self.config.mount_point.trim_end_matches('/'), relative);
        let command = format!("rm -rf -- {}", shell_quote(&target));
        let mount = SandboxMount::read_write(volume, &self.config.mount_point);
        match self.runtime.run_in_sandbox(&command, &[mount]) {
            Ok(_) => {
                self.sizes.invalidate(volume);
                tracing::info!("Deleted {} from volume {}", relative, volume);
                Some(relative)
            }
            Err(e) => {
                tracing::error!("Failed to delete {} from volume '{}': {}", relative, volume, e);
                None
            }
        }
    }
}

impl<R: ContainerRuntime + Sync> VolumeCatalog<R> {
    /// Fetch several volume trees, one sandbox per volume, in parallel.
    pub fn volume_trees(&self, names: &[String]) -> Vec<(String, FileTree)> {
        names
            .par_iter()
            .map(|name| (name.clone(), self.volume_tree(name)))
            .collect()
    }
}

/// Normalize a volume-relative path for deletion. Rejects anything that could
/// address the volume root or escape it.
fn sanitize_relative_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return None;
    }
    Some(segments.join("/"))
}
