//! Network lifecycle of managed containers.
//!
//! [`Manager`] decides per container whether its network has to be brought up or torn down and
//! drives the CNI gateway accordingly. [`NetworkState`] remembers which run instance is
//! networked and keeps a state file per instance.
mod error;
pub mod hosts;
mod locker;
mod manager;
mod state;

pub use error::{Error, Result};
pub use manager::{EvaluateFuture, Manager, Transition};
pub use state::NetworkState;
