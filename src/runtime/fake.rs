//! In-memory runtime used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    ContainerInfo, ContainerRuntime, RemoteError, SandboxExecutor, SandboxMount, VolumeInfo,
};

type Responder = Box<dyn Fn(&str, &[SandboxMount]) -> Result<String, RemoteError> + Send + Sync>;

pub(crate) struct FakeRuntime {
    pub volumes: Vec<VolumeInfo>,
    pub containers: Vec<ContainerInfo>,
    pub fail_listing: bool,
    pub fail_remove: bool,
    responder: Responder,
    calls: Mutex<Vec<(String, Vec<SandboxMount>)>>,
    removed: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[SandboxMount]) -> Result<String, RemoteError> + Send + Sync + 'static,
    {
        Self {
            volumes: Vec::new(),
            containers: Vec::new(),
            fail_listing: false,
            fail_remove: false,
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Answers `du` batches with one `<size>\t<target>` line per mounted volume.
    pub fn with_sizes(sizes: &[(&str, &str)]) -> Self {
        let sizes: HashMap<String, String> = sizes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(move |_, mounts| {
            Ok(mounts
                .iter()
                .map(|m| {
                    let size = sizes.get(&m.volume).map_or("?", String::as_str);
                    format!("{}\t{}", size, m.target)
                })
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }

    pub fn failing() -> Self {
        Self::new(|command, _| {
            Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status: Some(125),
                stderr: "Unable to find image".to_string(),
            })
        })
    }

    pub fn calls(&self) -> Vec<(String, Vec<SandboxMount>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Unavailable(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "docker not found",
    ))
}

impl SandboxExecutor for FakeRuntime {
    fn run_in_sandbox(&self, command: &str, mounts: &[SandboxMount]) -> Result<String, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), mounts.to_vec()));
        (self.responder)(command, mounts)
    }
}

impl ContainerRuntime for FakeRuntime {
    fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RemoteError> {
        if self.fail_listing {
            return Err(unavailable());
        }
        Ok(self.volumes.clone())
    }

    fn list_containers(&self) -> Result<Vec<ContainerInfo>, RemoteError> {
        if self.fail_listing {
            return Err(unavailable());
        }
        Ok(self.containers.clone())
    }

    fn remove_volume(&self, name: &str) -> Result<(), RemoteError> {
        if self.fail_remove {
            return Err(RemoteError::CommandFailed {
                command: "docker volume".to_string(),
                status: Some(1),
                stderr: format!("Error: No such volume: {name}"),
            });
        }
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
