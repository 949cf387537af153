use std::path::PathBuf;

use crate::container::ContainerID;
use crate::fsutil;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to inspect container `{id}`: {source}")]
    Inspect {
        id: ContainerID,
        #[source]
        source: crate::runtime::Error,
    },
    #[error("container `{0}` does not exist")]
    ContainerNotFound(ContainerID),
    #[error("container `{0}` has no running process")]
    NotRunning(ContainerID),
    #[error("failed to open network namespace `{path}`: {source}")]
    OpenNamespace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to switch to network namespace `{path}`: {source}")]
    SetNamespace {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("namespace worker thread failed: {0}")]
    Worker(String),
    #[error("in network namespace of container `{id}`: {source}")]
    Callback {
        id: ContainerID,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to query metadata: {0}")]
    Metadata(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),
    #[error("failed to read interfaces from `{path}`: {source}")]
    ReadInterfaces {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
