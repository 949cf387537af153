//! Scoped access to container network namespaces.
//!
//! Linux tracks the network namespace per thread. Entering a namespace therefore happens on a
//! dedicated thread that is switched back before it exits, see [`run_in_namespace`].
mod enter;
mod error;
mod probe;

pub use enter::{
    MetadataContainer, MetadataError, MetadataSource, enter_ns, for_each_container_ns,
    namespace_targets, run_in_namespace,
};
pub use error::{Error, Result};
pub use probe::InterfaceProbe;
