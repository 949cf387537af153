use std::path::PathBuf;

use crate::container::ContainerID;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no OCI bundle found for container `{0}`")]
    BundleNotFound(ContainerID),
    #[error("failed to look up bundle `{path}`: {source}")]
    BundleLookup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid network name `{0}`")]
    InvalidNetworkName(String),
    #[error("no configuration for network `{network}` in `{dir}`")]
    ConfigNotFound { network: String, dir: PathBuf },
    #[error("failed to read network configuration `{path}`: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse network configuration `{path}`: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid network configuration `{path}`: {reason}")]
    ConfigInvalid { path: PathBuf, reason: &'static str },
    #[error("failed to execute plugin `{plugin}`: {source}")]
    Spawn {
        plugin: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin `{plugin}` failed with code {code}: {msg} {details}")]
    Plugin {
        plugin: PathBuf,
        code: u32,
        msg: String,
        details: String,
    },
    #[error("plugin `{plugin}` exited with {status}: {stderr}")]
    PluginExit {
        plugin: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("failed to decode result of plugin `{plugin}`: {source}")]
    DecodeResult {
        plugin: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("network `{0}` produced no result")]
    EmptyResult(String),
}

pub type Result<T> = std::result::Result<T, Error>;
