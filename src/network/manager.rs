use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::cni::{self, CniGateway, CniResult, PluginState};
use crate::config::{Config, Labels};
use crate::container::{ContainerID, ContainerInspect, NetworkMarker};
use crate::error::ResultOkLogExt;
use crate::netns::InterfaceProbe;
use crate::runtime::Runtime;

use super::hosts;
use super::locker::Locker;
use super::state::NetworkState;
use super::{Error, Result};

/// Future returned by [`Manager::evaluate`].
pub type EvaluateFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// What an evaluation has to do to the network of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BringUp,
    TearDown,
}

impl Transition {
    /// Derives the transition from the recorded start time of the networked instance and the
    /// observed state of the container.
    ///
    /// A running container whose start time differs from the recorded one is a new instance and
    /// is brought up. The superseded instance is not torn down, its namespace went away with it.
    pub fn derive(was_started_at: Option<&str>, running: bool, started_at: &str) -> Self {
        match (was_started_at, running) {
            (Some(was_started_at), true) if was_started_at != started_at => Self::BringUp,
            (Some(_), false) => Self::TearDown,
            (None, true) => Self::BringUp,
            _ => Self::None,
        }
    }
}

/// A re-evaluation waiting for its delay to pass.
#[derive(Debug)]
struct PendingRetry {
    generation: u64,
    task: tokio::task::AbortHandle,
}

/// Failed ADD attempts of one run instance.
#[derive(Debug)]
struct AddFailures {
    started_at: String,
    count: u32,
}

/// Drives the network of every container through its lifecycle.
///
/// All work for one container happens under its lock, from reading the recorded state over the
/// inspect to the CNI call. Failed bring-ups are re-evaluated after a fixed delay until the
/// retry budget of the run instance is used up.
pub struct Manager<R, G> {
    runtime: Arc<R>,
    gateway: Arc<G>,
    state: NetworkState,
    locks: Locker,
    labels: Labels,
    max_retries: u32,
    retry_delay: Duration,
    failures: DashMap<ContainerID, AddFailures>,
    retries: DashMap<ContainerID, PendingRetry>,
    next_generation: AtomicU64,
    this: Weak<Self>,
}

impl<R, G> Manager<R, G>
where
    R: Runtime,
    G: CniGateway,
{
    /// Creates the manager and recovers the state of containers that were networked before the
    /// agent (re)started.
    ///
    /// # Errors
    ///
    /// Fails if the containers cannot be listed or inspected.
    pub async fn new(config: &Config, runtime: Arc<R>, gateway: Arc<G>) -> Result<Arc<Self>> {
        let state = NetworkState::new(&config.state_dir);
        state
            .recover(runtime.as_ref(), &InterfaceProbe::new(&config.proc_root))
            .await?;

        Ok(Arc::new_cyclic(|this| Self {
            runtime,
            gateway,
            state,
            locks: Locker::default(),
            labels: config.labels.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            failures: DashMap::new(),
            retries: DashMap::new(),
            next_generation: AtomicU64::new(0),
            this: Weak::clone(this),
        }))
    }

    /// Brings the network of container `id` in line with its current state.
    ///
    /// A failed bring-up is retried in the background; the error of the first attempt is still
    /// returned.
    pub fn evaluate<'a>(&'a self, id: &'a ContainerID) -> EvaluateFuture<'a> {
        Box::pin(self.evaluate_locked(id))
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    /// Returns true if a re-evaluation of `id` is scheduled.
    pub fn has_pending_retry(&self, id: &ContainerID) -> bool {
        self.retries.contains_key(id)
    }

    async fn evaluate_locked(&self, id: &ContainerID) -> Result<()> {
        let _guard = self.locks.lock(id).await;

        let was_started_at = self.state.start_time(id);
        let inspect = self
            .runtime
            .inspect(id)
            .await
            .map_err(|source| Error::Inspect {
                id: id.clone(),
                source,
            })?;

        let observed = match inspect {
            None => None,
            Some(inspect) => match NetworkMarker::classify(&inspect, &self.labels) {
                NetworkMarker::Managed(network) => Some((inspect, network)),
                NetworkMarker::Unmanaged => {
                    log::trace!("Ignoring container without managed network: cid={}", id);
                    return Ok(());
                }
            },
        };
        let (running, started_at) = match &observed {
            Some((inspect, _)) => (inspect.state.running, inspect.state.started_at.as_str()),
            None => (false, ""),
        };

        log::debug!(
            "Evaluating networking start: cid={}, was_started_at={}, running={}, started_at={}",
            id,
            was_started_at.as_deref().unwrap_or_default(),
            running,
            started_at
        );
        let transition = Transition::derive(was_started_at.as_deref(), running, started_at);

        match (transition, observed) {
            (Transition::BringUp, Some((inspect, network))) => {
                self.network_up(id, inspect, &network).await
            }
            (Transition::TearDown, observed) => self.network_down(id, observed).await,
            (Transition::None, _) if !running => {
                // Never came up. Nothing is left to retry for this instance.
                self.forget(id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Drops the retry bookkeeping of `id`.
    fn forget(&self, id: &ContainerID) {
        self.cancel_retry(id);
        self.failures.remove(id);
    }

    async fn network_up(
        &self,
        id: &ContainerID,
        inspect: ContainerInspect,
        network: &str,
    ) -> Result<()> {
        let started_at = inspect.state.started_at.clone();
        log::info!("CNI up: cid={}, network={}", id, network);

        let plugin_state = match self.gateway.lookup_plugin_state(&inspect, network) {
            Ok(plugin_state) => plugin_state,
            Err(source) => {
                let err = Error::LookupPluginState {
                    id: id.clone(),
                    source,
                };
                self.state.record_error(id, &started_at, &err).ok_log();
                return Err(err);
            }
        };

        let result = match self.gateway.add(&plugin_state).await {
            Ok(result) => result,
            Err(source) => {
                let err = Error::Add {
                    id: id.clone(),
                    network: network.to_owned(),
                    source,
                };
                return Err(self.add_failed(id, &started_at, err));
            }
        };

        self.forget(id);
        log::info!(
            "CNI up done: cid={}, network={}, ip={}",
            id,
            network,
            result
                .ipv4()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".to_owned())
        );
        self.state.started(id, &started_at, Some(&result)).ok_log();

        if let Err(err) = setup_hosts(&inspect, &result) {
            // The network is up and stays recorded, keep its result next to the error.
            let descriptor = serde_json::json!({ "error": err.to_string(), "result": result });
            self.state.started(id, &started_at, Some(&descriptor)).ok_log();
            return Err(err);
        }
        Ok(())
    }

    /// Counts the failure against the run instance and either schedules a retry or records the
    /// error once the budget is used up.
    fn add_failed(&self, id: &ContainerID, started_at: &str, err: Error) -> Error {
        let attempts = {
            let mut failures = self
                .failures
                .entry(id.clone())
                .or_insert_with(|| AddFailures {
                    started_at: started_at.to_owned(),
                    count: 0,
                });
            if failures.started_at != started_at {
                *failures = AddFailures {
                    started_at: started_at.to_owned(),
                    count: 0,
                };
            }
            failures.count += 1;
            failures.count
        };

        if attempts <= self.max_retries {
            log::warn!(
                "CNI up failed, retrying: cid={}, count={}, error={}",
                id,
                attempts,
                err
            );
            self.schedule_retry(id, attempts);
        } else {
            log::error!(
                "CNI up failed, giving up: cid={}, attempts={}, error={}",
                id,
                attempts,
                err
            );
            self.state.record_error(id, started_at, &err).ok_log();
        }
        err
    }

    async fn network_down(
        &self,
        id: &ContainerID,
        observed: Option<(ContainerInspect, String)>,
    ) -> Result<()> {
        self.forget(id);

        let result = match observed {
            Some((inspect, network)) => self.delete(id, &inspect, &network).await,
            None => {
                log::info!("Container is gone, clearing network state: cid={}", id);
                Ok(())
            }
        };
        self.state.stopped(id).ok_log();
        result
    }

    async fn delete(
        &self,
        id: &ContainerID,
        inspect: &ContainerInspect,
        network: &str,
    ) -> Result<()> {
        log::info!("CNI down: cid={}, network={}", id, network);

        let plugin_state = match self.gateway.lookup_plugin_state(inspect, network) {
            Ok(plugin_state) => plugin_state,
            Err(cni::Error::BundleNotFound(_)) => PluginState {
                container_id: id.clone(),
                network: network.to_owned(),
                bundle_path: None,
                pid: inspect.state.pid,
            },
            Err(source) => {
                return Err(Error::LookupPluginState {
                    id: id.clone(),
                    source,
                });
            }
        };

        self.gateway
            .del(&plugin_state)
            .await
            .map_err(|source| Error::Del {
                id: id.clone(),
                network: network.to_owned(),
                source,
            })
    }

    /// Schedules a re-evaluation of `id`, replacing a retry that is still waiting.
    fn schedule_retry(&self, id: &ContainerID, count: u32) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let this = Weak::clone(&self.this);
        let delay = self.retry_delay;
        let retry_id = id.clone();

        // The entry stays locked until the retry is registered, so the task cannot look for its
        // entry before it exists.
        let entry = self.retries.entry(id.clone());
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = this.upgrade() else {
                return;
            };
            manager
                .retries
                .remove_if(&retry_id, |_, pending| pending.generation == generation);

            log::info!(
                "Evaluating state from retry: cid={}, count={}",
                retry_id,
                count
            );
            if let Err(err) = manager.evaluate(&retry_id).await {
                log::error!(
                    "Failed to evaluate networking: cid={}, error={}",
                    retry_id,
                    err
                );
            }
        });

        let pending = PendingRetry {
            generation,
            task: task.abort_handle(),
        };
        match entry {
            Entry::Occupied(mut occupied) => occupied.insert(pending).task.abort(),
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }
    }

    fn cancel_retry(&self, id: &ContainerID) {
        if let Some((_, pending)) = self.retries.remove(id) {
            pending.task.abort();
            log::debug!("Cancelled pending retry: cid={}", id);
        }
    }
}

/// Adds `<ip> <hostname>` to the hosts file of the container if it has all three.
fn setup_hosts(inspect: &ContainerInspect, result: &CniResult) -> Result<()> {
    let (Some(path), Some(ip)) = (inspect.hosts_path.as_deref(), result.ipv4()) else {
        return Ok(());
    };
    let hostname = inspect.config.hostname.as_str();
    if hostname.is_empty() {
        return Ok(());
    }

    if hosts::ensure_host_entry(path, ip, hostname)? {
        log::debug!(
            "Added hosts entry: cid={}, ip={}, hostname={}",
            inspect.id,
            ip,
            hostname
        );
    }
    Ok(())
}
