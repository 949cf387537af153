use std::path::PathBuf;

use crate::container::ContainerID;
use crate::fsutil;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to list containers: {0}")]
    ListContainers(#[source] crate::runtime::Error),
    #[error("failed to inspect container `{id}`: {source}")]
    Inspect {
        id: ContainerID,
        #[source]
        source: crate::runtime::Error,
    },
    #[error("couldn't find plugin state of container `{id}`: {source}")]
    LookupPluginState {
        id: ContainerID,
        #[source]
        source: crate::cni::Error,
    },
    #[error("couldn't bring up network `{network}` of container `{id}`: {source}")]
    Add {
        id: ContainerID,
        network: String,
        #[source]
        source: crate::cni::Error,
    },
    #[error("couldn't tear down network `{network}` of container `{id}`: {source}")]
    Del {
        id: ContainerID,
        network: String,
        #[source]
        source: crate::cni::Error,
    },
    #[error("couldn't set up hosts file `{path}`: {source}")]
    Hosts {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid start time `{0}`")]
    InvalidStartedAt(String),
    #[error("failed to encode network state `{path}`: {source}")]
    EncodeState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    WriteState(#[from] fsutil::FileWriteError),
    #[error("failed to remove network state `{path}`: {source}")]
    RemoveState {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
