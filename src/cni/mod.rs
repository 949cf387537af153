//! Invocation of CNI plugin chains.
//!
//! The [`CniGateway`] trait is the seam the network manager talks to. [`CniExec`] implements it
//! by executing plugin binaries the way the CNI protocol prescribes: configuration on stdin,
//! parameters in `CNI_*` environment variables, result or error document on stdout.
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::container::{ContainerID, ContainerInspect};

mod conf;
mod error;
mod exec;

pub use conf::NetworkConfigList;
pub use error::{Error, Result};
pub use exec::CniExec;

/// Everything a plugin invocation needs to know about the container.
///
/// Built fresh for every call, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginState {
    pub container_id: ContainerID,
    pub network: String,
    /// OCI bundle of the container, `None` if the runtime already removed it.
    pub bundle_path: Option<PathBuf>,
    /// Init process of the container, `0` if it is not running.
    pub pid: u32,
}

/// The raw result document of a successful ADD.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CniResult(serde_json::Value);

impl CniResult {
    pub fn new(raw: serde_json::Value) -> Self {
        Self(raw)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Returns the first IPv4 address of the result.
    ///
    /// Understands both the legacy `ip4.ip` layout and the `ips[].address` layout of later
    /// result versions.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        if let Some(ip) = self.0.pointer("/ip4/ip").and_then(serde_json::Value::as_str) {
            return parse_ipv4_cidr(ip);
        }

        self.0
            .get("ips")?
            .as_array()?
            .iter()
            .filter_map(|ip| ip.get("address")?.as_str())
            .find_map(parse_ipv4_cidr)
    }
}

fn parse_ipv4_cidr(cidr: &str) -> Option<Ipv4Addr> {
    cidr.split('/').next()?.parse().ok()
}

pub trait CniGateway: Send + Sync + 'static {
    /// Resolves the plugin state of a container for `network`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BundleNotFound`] if the runtime has no bundle for the container.
    fn lookup_plugin_state(&self, inspect: &ContainerInspect, network: &str)
    -> Result<PluginState>;

    /// Runs ADD for the network chain of `state`.
    fn add(&self, state: &PluginState) -> impl Future<Output = Result<CniResult>> + Send;

    /// Runs DEL for the network chain of `state`.
    fn del(&self, state: &PluginState) -> impl Future<Output = Result<()>> + Send;
}
