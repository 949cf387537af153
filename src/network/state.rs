use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::Serialize;

use crate::container::ContainerID;
use crate::fsutil;
use crate::netns::InterfaceProbe;
use crate::runtime::Runtime;

use super::{Error, Result};

/// Tracks which run instance of a container currently has its network applied.
///
/// The in-memory table maps a container id to the `StartedAt` of the networked instance. Next to
/// it, every instance gets a file `<root>/<id>/<started_at>` holding either the CNI result or an
/// error descriptor.
#[derive(Debug)]
pub struct NetworkState {
    root: PathBuf,
    start_times: DashMap<ContainerID, String>,
}

impl NetworkState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            start_times: DashMap::new(),
        }
    }

    /// Start time of the networked instance of `id`, `None` if the container is not networked.
    pub fn start_time(&self, id: &ContainerID) -> Option<String> {
        self.start_times.get(id).map(|entry| entry.value().clone())
    }

    /// Marks the instance `started_at` of `id` as networked.
    ///
    /// The in-memory table is updated even if `payload` cannot be persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is given and writing the state file fails.
    pub fn started<T>(&self, id: &ContainerID, started_at: &str, payload: Option<&T>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.start_times.insert(id.clone(), started_at.to_owned());
        match payload {
            Some(payload) => self.write_state(id, started_at, payload),
            None => Ok(()),
        }
    }

    /// Forgets `id` and removes all of its state files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoveState`] if the directory exists but cannot be removed. The
    /// in-memory entry is cleared regardless.
    pub fn stopped(&self, id: &ContainerID) -> Result<()> {
        self.start_times.remove(id);

        let dir = self.container_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::RemoveState { path: dir, source }),
        }
    }

    /// Persists an error descriptor for the instance `started_at` of `id`.
    ///
    /// The in-memory table is left untouched.
    pub fn record_error(
        &self,
        id: &ContainerID,
        started_at: &str,
        err: &dyn std::error::Error,
    ) -> Result<()> {
        let descriptor = serde_json::json!({ "error": err.to_string() });
        self.write_state(id, started_at, &descriptor)
    }

    /// Path of the state file of an instance.
    pub fn state_file(&self, id: &ContainerID, started_at: &str) -> Result<PathBuf> {
        if started_at.is_empty()
            || started_at.contains('/')
            || started_at == "."
            || started_at == ".."
        {
            return Err(Error::InvalidStartedAt(started_at.to_owned()));
        }
        Ok(self.container_dir(id).join(started_at))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Seeds the table from the containers that are already running.
    ///
    /// A running container whose namespace has more than the loopback interface has been wired
    /// up before a restart and is recorded without a state file. Everything else is left to the
    /// first regular evaluation.
    ///
    /// # Errors
    ///
    /// Fails if the containers cannot be listed or inspected. Failing to look into a single
    /// namespace is logged and skipped.
    pub async fn recover<R: Runtime>(&self, runtime: &R, probe: &InterfaceProbe) -> Result<()> {
        let containers = runtime
            .list_containers()
            .await
            .map_err(Error::ListContainers)?;

        for summary in containers {
            let inspect = match runtime.inspect(&summary.id).await {
                Ok(Some(inspect)) => inspect,
                Ok(None) => continue,
                Err(source) => {
                    return Err(Error::Inspect {
                        id: summary.id,
                        source,
                    });
                }
            };
            log::info!(
                "Inspecting on start: cid={}, running={}, started_at={}",
                inspect.id,
                inspect.state.running,
                inspect.state.started_at
            );
            if !inspect.state.running {
                continue;
            }

            match probe.has_network(inspect.state.pid) {
                Ok(true) => {
                    log::info!(
                        "Recording previously started: cid={}, started_at={}",
                        inspect.id,
                        inspect.state.started_at
                    );
                    self.started::<()>(&inspect.id, &inspect.state.started_at, None)?;
                }
                Ok(false) => log::info!("Still needs networking: cid={}", inspect.id),
                Err(err) => {
                    log::error!(
                        "failed to inspect interfaces: cid={}, error={}",
                        inspect.id,
                        err
                    );
                }
            }
        }

        Ok(())
    }

    fn container_dir(&self, id: &ContainerID) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn write_state<T>(&self, id: &ContainerID, started_at: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let path = self.state_file(id, started_at)?;
        let data = serde_json::to_vec_pretty(payload).map_err(|source| Error::EncodeState {
            path: path.clone(),
            source,
        })?;
        fsutil::write_atomic(&path, &data)?;
        log::debug!("Wrote network state: cid={}, path={}", id, path.display());
        Ok(())
    }
}
