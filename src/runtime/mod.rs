//! Access to the container runtime.
//!
//! The agent only needs three things from the runtime: the list of known containers, a fresh
//! inspect document for a single container, and a stream of lifecycle events. [`Runtime`] and
//! [`EventSource`] describe these capabilities, [`DockerClient`] implements both against the
//! docker engine API.
use std::future::Future;

use crate::container::{ContainerID, ContainerInspect, ContainerSummary};

mod docker;
mod error;
mod event;
mod http;

pub use docker::DockerClient;
pub use error::{Error, Result};
pub use event::{ContainerEvent, SIMULATED_EVENT_SOURCE, STATUS_DIE, STATUS_START};

pub trait Runtime: Send + Sync + 'static {
    /// Lists all known containers, running or not.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<ContainerSummary>>> + Send;

    /// Inspects a single container.
    ///
    /// Returns `Ok(None)` if the container does not exist (anymore).
    fn inspect(
        &self,
        id: &ContainerID,
    ) -> impl Future<Output = Result<Option<ContainerInspect>>> + Send;
}

pub trait EventSource: Send + Sync + 'static {
    /// Starts forwarding lifecycle events into `tx` until the returned [`Subscription`] is
    /// stopped or the receiving side is dropped.
    fn subscribe(
        &self,
        tx: tokio::sync::mpsc::Sender<ContainerEvent>,
    ) -> impl Future<Output = Result<Subscription>> + Send;
}

/// Handle of an active event subscription.
#[derive(Debug)]
pub struct Subscription {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription without a backing task, for sources that push events by other means.
    pub fn detached() -> Self {
        Self { task: None }
    }

    /// Stops forwarding events. Events already queued are not affected.
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
