use std::collections::HashMap;
use std::path::PathBuf;

use super::ContainerID;

/// Entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: ContainerID,
    #[serde(default)]
    pub state: String,
}

/// The subset of a container inspect document used to drive networking.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: ContainerID,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub host_config: HostConfig,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub hosts_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub running: bool,
    /// Start timestamp of the current run instance, unique per run.
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub pid: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default)]
    pub network_mode: String,
}

impl HostConfig {
    /// Returns true if the container joins the host namespace or the namespace of another
    /// container instead of owning one.
    pub fn shares_network_namespace(&self) -> bool {
        self.network_mode == "host" || self.network_mode.starts_with("container")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

impl ContainerConfig {
    pub fn new(hostname: impl Into<String>, labels: HashMap<String, String>) -> Self {
        Self {
            hostname: hostname.into(),
            labels: Some(labels),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.as_ref()?.get(key).map(String::as_str)
    }
}
