use tokio::sync::mpsc;

use crate::runtime::{ContainerEvent, Runtime};

use super::{Error, Result};

/// Submits a simulated `start` event for every container the runtime knows about.
///
/// Containers that changed while the agent was down are evaluated once this way. Stopped
/// containers are included, their evaluation tears down what is left of a previous run.
///
/// Returns the number of submitted events.
pub async fn replay_containers<R: Runtime>(
    runtime: &R,
    sender: &mpsc::Sender<ContainerEvent>,
) -> Result<usize> {
    let containers = runtime.list_containers().await.map_err(Error::Replay)?;
    let count = containers.len();
    for container in containers {
        sender
            .send(ContainerEvent::simulated_start(container.id))
            .await
            .map_err(|_| Error::Closed)?;
    }
    log::debug!("Replayed container events: count={}", count);
    Ok(count)
}
