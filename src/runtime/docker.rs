use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{
    ContainerInfo, ContainerMount, ContainerRuntime, RemoteError, SandboxExecutor, SandboxMount,
    VolumeInfo,
};
use crate::config::AnalyzerConfig;

/// Talks to the container runtime through the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_bin: String,
    image: String,
}

impl DockerCli {
    pub fn new(docker_bin: &str, image: &str) -> Self {
        Self {
            docker_bin: docker_bin.to_string(),
            image: image.to_string(),
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(&config.docker_bin, &config.sandbox_image)
    }

    /// Arguments for `docker run` that execute `command` in a throwaway sandbox.
    fn sandbox_args(&self, command: &str, mounts: &[SandboxMount]) -> Vec<String> {
        let mut args: Vec<String> = ["run", "--rm", "--network", "none"]
            .into_iter()
            .map(String::from)
            .collect();
        for mount in mounts {
            args.push("-v".into());
            args.push(format!("{}:{}:{}", mount.volume, mount.target, mount.mode.as_str()));
        }
        args.push(self.image.clone());
        args.push("sh".into());
        args.push("-c".into());
        args.push(command.to_string());
        args
    }

    fn docker<S: AsRef<str>>(&self, args: &[S]) -> Result<String, RemoteError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        tracing::debug!("{} {}", self.docker_bin, args.join(" "));

        let output = Command::new(&self.docker_bin).args(&args).output()?;
        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: format!("{} {}", self.docker_bin, args.first().copied().unwrap_or("")),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SandboxExecutor for DockerCli {
    fn run_in_sandbox(&self, command: &str, mounts: &[SandboxMount]) -> Result<String, RemoteError> {
        self.docker(self.sandbox_args(command, mounts).as_slice())
    }
}

impl ContainerRuntime for DockerCli {
    fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RemoteError> {
        let names = self.docker(&["volume", "ls", "-q"])?;
        let mut args = vec!["volume", "inspect"];
        args.extend(names.lines().map(str::trim).filter(|n| !n.is_empty()));
        if args.len() == 2 {
            return Ok(Vec::new());
        }
        Ok(decode_volumes(&self.docker(args.as_slice())?)?)
    }

    fn list_containers(&self) -> Result<Vec<ContainerInfo>, RemoteError> {
        let ids = self.docker(&["ps", "-aq"])?;
        let mut args = vec!["inspect"];
        args.extend(ids.lines().map(str::trim).filter(|id| !id.is_empty()));
        if args.len() == 1 {
            return Ok(Vec::new());
        }
        Ok(decode_containers(&self.docker(args.as_slice())?)?)
    }

    fn remove_volume(&self, name: &str) -> Result<(), RemoteError> {
        self.docker(&["volume", "rm", "-f", name])?;
        tracing::info!("Removed volume {}", name);
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeInspect {
    name: String,
    #[serde(default)]
    mountpoint: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    name: String,
    #[serde(default)]
    mounts: Vec<MountInspect>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountInspect {
    #[serde(default, rename = "Type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    driver: Option<String>,
    #[serde(default)]
    mode: String,
    #[serde(default, rename = "RW")]
    rw: bool,
}

/// Decode the JSON array printed by `docker volume inspect`.
pub fn decode_volumes(json: &str) -> Result<Vec<VolumeInfo>, serde_json::Error> {
    let raw: Vec<VolumeInspect> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .map(|v| VolumeInfo {
            created_at: v
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            name: v.name,
            mountpoint: v.mountpoint,
            driver: v.driver,
        })
        .collect())
}

/// Decode the JSON array printed by `docker inspect` for containers.
pub fn decode_containers(json: &str) -> Result<Vec<ContainerInfo>, serde_json::Error> {
    let raw: Vec<ContainerInspect> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .map(|c| ContainerInfo {
            name: c.name.trim_start_matches('/').to_string(),
            mounts: c
                .mounts
                .into_iter()
                .map(|m| ContainerMount {
                    volume: m.name.filter(|_| m.kind == "volume"),
                    destination: m.destination,
                    driver: m.driver.unwrap_or_default(),
                    mode: m.mode,
                    rw: m.rw,
                })
                .collect(),
        })
        .collect())
}
