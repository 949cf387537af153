use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sched::{CloneFlags, setns};

use crate::container::ContainerID;
use crate::runtime::Runtime;

use super::{Error, Result};

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Switches the calling thread back to its original namespace when dropped.
struct RestoreNamespace {
    origin: File,
}

impl Drop for RestoreNamespace {
    fn drop(&mut self) {
        if let Err(err) = setns(&self.origin, CloneFlags::CLONE_NEWNET) {
            // The thread is discarded right after, so a failure cannot leak into other work.
            log::error!("failed to restore original network namespace: {}", err);
        }
    }
}

/// Runs `f` with the network namespace at `ns_path` current.
///
/// `f` executes on a dedicated OS thread that exists only for this call; the namespace switch
/// never affects runtime worker threads. The original namespace is restored on every exit path,
/// including a panic in `f`, which is propagated to the caller.
///
/// # Errors
///
/// Returns [`Error::OpenNamespace`] or [`Error::SetNamespace`] if the namespace cannot be
/// entered, in which case `f` is not invoked.
pub fn run_in_namespace<F, T>(ns_path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let origin = File::open(THREAD_NETNS).map_err(|source| Error::OpenNamespace {
                path: PathBuf::from(THREAD_NETNS),
                source,
            })?;
            let target = File::open(ns_path).map_err(|source| Error::OpenNamespace {
                path: ns_path.to_path_buf(),
                source,
            })?;

            setns(&target, CloneFlags::CLONE_NEWNET).map_err(|source| Error::SetNamespace {
                path: ns_path.to_path_buf(),
                source,
            })?;
            let _restore = RestoreNamespace { origin };

            Ok(f())
        });
        match worker.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

/// Runs `f` inside the network namespace of container `id`.
///
/// Containers on the host network or sharing the namespace of another container are skipped:
/// `f` is not invoked and `Ok(None)` is returned.
///
/// # Errors
///
/// Fails if the container cannot be inspected, does not exist, has no running process or its
/// namespace cannot be entered.
pub async fn enter_ns<R, F, T>(
    runtime: &R,
    proc_root: &Path,
    id: &ContainerID,
    f: F,
) -> Result<Option<T>>
where
    R: Runtime,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let inspect = runtime
        .inspect(id)
        .await
        .map_err(|source| Error::Inspect {
            id: id.clone(),
            source,
        })?
        .ok_or_else(|| Error::ContainerNotFound(id.clone()))?;

    if inspect.host_config.shares_network_namespace() {
        log::debug!(
            "Skipping namespace entry: cid={}, network_mode={}",
            id,
            inspect.host_config.network_mode
        );
        return Ok(None);
    }
    if inspect.state.pid == 0 {
        return Err(Error::NotRunning(id.clone()));
    }

    let ns_path = proc_root
        .join(inspect.state.pid.to_string())
        .join("ns/net");
    tokio::task::spawn_blocking(move || run_in_namespace(&ns_path, f))
        .await
        .map_err(|err| Error::Worker(err.to_string()))?
        .map(Some)
}

/// A container as reported by the orchestrator metadata service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataContainer {
    pub host_uuid: String,
    pub state: String,
    pub external_id: String,
    pub primary_ip: String,
    pub primary_mac_address: String,
    pub network_uuid: String,
}

pub type MetadataError = Box<dyn std::error::Error + Send + Sync>;

/// Read access to the orchestrator metadata, implemented outside this crate.
pub trait MetadataSource: Send + Sync {
    fn self_host_uuid(&self) -> impl Future<Output = std::result::Result<String, MetadataError>> + Send;

    fn containers(
        &self,
    ) -> impl Future<Output = std::result::Result<Vec<MetadataContainer>, MetadataError>> + Send;
}

/// Selects the containers of `network_uuid` that run on this host and are fully wired, i.e.
/// have a runtime id, a primary IP and a primary MAC address.
pub fn namespace_targets<'a>(
    host_uuid: &'a str,
    network_uuid: &'a str,
    containers: &'a [MetadataContainer],
) -> impl Iterator<Item = &'a MetadataContainer> + 'a {
    containers.iter().filter(move |c| {
        c.host_uuid == host_uuid
            && c.state == "running"
            && !c.external_id.is_empty()
            && !c.primary_ip.is_empty()
            && !c.primary_mac_address.is_empty()
            && c.network_uuid == network_uuid
    })
}

/// Runs `f` inside the namespace of every running container of `network_uuid` on this host.
///
/// A failure for one container does not stop the iteration; the last error is returned.
pub async fn for_each_container_ns<R, M, F, E>(
    runtime: &R,
    metadata: &M,
    proc_root: &Path,
    network_uuid: &str,
    f: F,
) -> Result<()>
where
    R: Runtime,
    M: MetadataSource,
    F: Fn(&MetadataContainer) -> std::result::Result<(), E> + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let host_uuid = metadata.self_host_uuid().await.map_err(Error::Metadata)?;
    let containers = metadata.containers().await.map_err(Error::Metadata)?;
    let f = Arc::new(f);

    let mut last_error = None;
    for container in namespace_targets(&host_uuid, network_uuid, &containers) {
        let id = match ContainerID::new(&container.external_id) {
            Ok(id) => id,
            Err(err) => {
                log::warn!("skipping metadata container: {}", err);
                continue;
            }
        };
        let f = Arc::clone(&f);
        let target = container.clone();
        let result = enter_ns(runtime, proc_root, &id, move || f(&target)).await;
        let err = match result {
            Ok(Some(Err(source))) => Error::Callback {
                id,
                source: Box::new(source),
            },
            Ok(_) => continue,
            Err(err) => err,
        };
        log::warn!("{}", err);
        last_error = Some(err);
    }

    last_error.map_or(Ok(()), Err)
}
