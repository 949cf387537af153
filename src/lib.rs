//! CNI Plugin Manager: a per-host agent that wires container networking through CNI plugin
//! chains.
//!
//! Container lifecycle events from the docker engine are routed to the network
//! [`Manager`](network::Manager), which brings the network of every managed container up once
//! per run instance and tears it down again when the container stops.
use std::sync::Arc;

use cni::CniExec;
use config::Config;
use events::{Handler, HandlerMap, NetworkManagerHandler, Router};
use network::Manager;
use runtime::{DockerClient, STATUS_DIE, STATUS_START};

pub mod cni;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod netns;
pub mod network;
pub mod runtime;

#[cfg(test)]
mod testing;

/// Runs the agent until interrupted.
///
/// Recovers the state of already networked containers, starts routing docker events, replays a
/// `start` event for every known container and waits for ctrl-c.
///
/// # Errors
///
/// Possible errors include:
/// - The docker engine cannot be reached to list, inspect or subscribe.
/// - Waiting for the shutdown signal fails.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("Configuration: {config:?}");

    let docker = Arc::new(DockerClient::new(&config.docker_socket));
    let gateway = Arc::new(CniExec::new(&config));
    let manager = Manager::new(&config, Arc::clone(&docker), gateway).await?;
    log::info!(
        "Recovered network state: state_dir={}",
        manager.state().root().display()
    );

    let network: Arc<dyn Handler> = Arc::new(NetworkManagerHandler::new(manager));
    let handlers = HandlerMap::from([
        (STATUS_START.to_owned(), vec![Some(Arc::clone(&network))]),
        (STATUS_DIE.to_owned(), vec![Some(network)]),
    ]);

    let mut router = Router::new(
        config.event_buffer_size,
        config.worker_pool_size,
        config.worker_timeout,
        Arc::clone(&docker),
        handlers,
    );
    router.start().await?;

    events::replay_containers(docker.as_ref(), &router.sender()).await?;
    log::info!("Watching container events: socket={}", docker.socket_path().display());

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    router.stop();
    Ok(())
}
