//! Routing of container lifecycle events to handler chains.
mod error;
mod handler;
mod replay;
mod router;

pub use error::{Error, Result};
pub use handler::{Handler, HandlerError, HandlerFuture, NetworkManagerHandler};
pub use replay::replay_containers;
pub use router::{HandlerMap, Router};
