use crate::config::Labels;

use super::ContainerInspect;

/// Network name used for containers that only carry the legacy markers.
const DEFAULT_MANAGED_NETWORK: &str = "managed";

/// Whether networking of a container is driven by this agent, and with which CNI network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMarker {
    Unmanaged,
    Managed(String),
}

impl NetworkMarker {
    /// Classifies a container from its labels and network mode.
    ///
    /// An explicit CNI network label always wins. Otherwise the legacy managed-network label or
    /// a requested IP select the default managed network, unless the container joins the host
    /// namespace or the namespace of another container.
    pub fn classify(inspect: &ContainerInspect, labels: &Labels) -> Self {
        if let Some(network) = inspect.config.label(&labels.cni_network) {
            if !network.is_empty() {
                return Self::Managed(network.to_owned());
            }
            return Self::Unmanaged;
        }

        if inspect.host_config.shares_network_namespace() {
            return Self::Unmanaged;
        }

        let legacy = inspect.config.label(&labels.legacy_managed) == Some("true");
        let requested_ip = inspect
            .config
            .label(&labels.ip)
            .is_some_and(|ip| !ip.is_empty());
        if legacy || requested_ip {
            return Self::Managed(DEFAULT_MANAGED_NETWORK.to_owned());
        }

        Self::Unmanaged
    }
}
