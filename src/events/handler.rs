use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cni::CniGateway;
use crate::network::Manager;
use crate::runtime::{ContainerEvent, Runtime};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Reacts to a single container event.
///
/// Handlers registered for the same status run one after another; an error is reported by the
/// router and does not stop the handlers after it.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, event: &'a ContainerEvent) -> HandlerFuture<'a>;
}

/// Forwards events to [`Manager::evaluate`].
pub struct NetworkManagerHandler<R, G> {
    manager: Arc<Manager<R, G>>,
}

impl<R, G> NetworkManagerHandler<R, G> {
    pub fn new(manager: Arc<Manager<R, G>>) -> Self {
        Self { manager }
    }
}

impl<R, G> Handler for NetworkManagerHandler<R, G>
where
    R: Runtime,
    G: CniGateway,
{
    fn handle<'a>(&'a self, event: &'a ContainerEvent) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.manager
                .evaluate(&event.id)
                .await
                .map_err(HandlerError::from)
        })
    }
}
