//! Boundary to the container runtime: sandboxed command execution plus the
//! volume and container listings the catalog needs.

pub mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

pub use self::docker::DockerCli;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("container runtime is not available: {0}")]
    Unavailable(#[from] std::io::Error),
    #[error("`{command}` failed with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("unexpected runtime output: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

/// One named volume bound into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxMount {
    pub volume: String,
    pub target: String,
    pub mode: MountMode,
}

impl SandboxMount {
    pub fn read_only(volume: &str, target: &str) -> Self {
        Self {
            volume: volume.to_string(),
            target: target.to_string(),
            mode: MountMode::ReadOnly,
        }
    }

    pub fn read_write(volume: &str, target: &str) -> Self {
        Self {
            volume: volume.to_string(),
            target: target.to_string(),
            mode: MountMode::ReadWrite,
        }
    }
}

/// Runs shell commands in a throwaway container.
pub trait SandboxExecutor {
    /// Run `command` with `sh -c` and return its trimmed standard output.
    fn run_in_sandbox(&self, command: &str, mounts: &[SandboxMount]) -> Result<String, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: String,
    pub driver: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A volume mount as seen from a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerMount {
    /// Volume name; `None` for bind mounts and tmpfs
    pub volume: Option<String>,
    pub destination: String,
    pub driver: String,
    pub mode: String,
    pub rw: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerInfo {
    pub name: String,
    pub mounts: Vec<ContainerMount>,
}

/// Everything the catalog asks of the container runtime.
pub trait ContainerRuntime: SandboxExecutor {
    fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RemoteError>;
    /// All containers, stopped ones included.
    fn list_containers(&self) -> Result<Vec<ContainerInfo>, RemoteError>;
    /// Force-remove a volume.
    fn remove_volume(&self, name: &str) -> Result<(), RemoteError>;
}

/// Whether `name` is a volume name the runtime would accept and that is safe
/// to splice into a sandbox path.
pub fn is_valid_volume_name(name: &str) -> bool {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex"))
        .is_match(name)
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
