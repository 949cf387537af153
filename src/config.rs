use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Errors that occur while reading the agent configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value `{value}` for environment variable `{key}`")]
    InvalidValue { key: &'static str, value: String },
    #[error("unsupported docker host `{0}`, only unix sockets are supported")]
    UnsupportedDockerHost(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Container labels that mark a container as carrying a managed network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    /// Names the CNI network explicitly.
    pub cni_network: String,
    /// Legacy marker, `"true"` means the container uses the default managed network.
    pub legacy_managed: String,
    /// A requested IP address also implies the default managed network.
    pub ip: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            cni_network: "io.rancher.cni.network".to_owned(),
            legacy_managed: "io.rancher.container.network".to_owned(),
            ip: "io.rancher.container.ip".to_owned(),
        }
    }
}

/// Runtime configuration of the agent.
///
/// Every collaborator receives the values it needs at construction, nothing is read from
/// global state afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory of the per-container network state files.
    pub state_dir: PathBuf,
    /// Unix socket of the docker engine API.
    pub docker_socket: PathBuf,
    /// Mount point of the host procfs.
    pub proc_root: PathBuf,
    /// Directory holding one `<network>.conflist` or `<network>.conf` per network.
    pub cni_conf_dir: PathBuf,
    /// Directory holding the CNI plugin binaries.
    pub cni_bin_dir: PathBuf,
    /// OCI bundle directory templates, `{id}` is replaced with the container id.
    pub bundle_paths: Vec<String>,
    /// Interface name handed to the plugins.
    pub interface_name: String,
    pub event_buffer_size: usize,
    pub worker_pool_size: usize,
    /// How long the dispatch loop waits for a free worker before logging and waiting again.
    pub worker_timeout: Duration,
    /// Number of re-evaluations after a failed bring-up before an error is recorded.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub labels: Labels,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/rancher/state/cni"),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            proc_root: PathBuf::from("/proc"),
            cni_conf_dir: PathBuf::from("/etc/docker/cni"),
            cni_bin_dir: PathBuf::from("/opt/cni/bin"),
            bundle_paths: vec![
                "/run/docker/libcontainerd/{id}".to_owned(),
                "/run/docker/runtime-runc/moby/{id}".to_owned(),
            ],
            interface_name: "eth0".to_owned(),
            event_buffer_size: 100,
            worker_pool_size: 100,
            worker_timeout: Duration::from_secs(60),
            max_retries: 15,
            retry_delay: Duration::from_secs(2),
            labels: Labels::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from the process environment.
    ///
    /// Unset variables keep their default value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if a numeric variable cannot be parsed and
    /// [`Error::UnsupportedDockerHost`] if `DOCKER_HOST` is not a `unix://` address.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("CNI_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("DOCKER_HOST") {
            let path = host
                .strip_prefix("unix://")
                .ok_or_else(|| Error::UnsupportedDockerHost(host.clone()))?;
            config.docker_socket = PathBuf::from(path);
        }
        if let Some(socket) = lookup("DOCKER_SOCKET") {
            config.docker_socket = PathBuf::from(socket);
        }
        if let Some(root) = lookup("PROC_ROOT") {
            config.proc_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("CNI_CONF_DIR") {
            config.cni_conf_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CNI_PATH") {
            config.cni_bin_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_var(&lookup, "EVENT_BUFFER_SIZE")? {
            config.event_buffer_size = size;
        }
        if let Some(size) = parse_var(&lookup, "WORKER_POOL_SIZE")? {
            config.worker_pool_size = size;
        }
        if let Some(secs) = parse_var(&lookup, "WORKER_TIMEOUT_SECS")? {
            config.worker_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_var(&lookup, "CNI_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(millis) = parse_var(&lookup, "CNI_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidValue { key, value }),
    }
}
