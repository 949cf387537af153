use std::path::PathBuf;
use std::process::Stdio;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::container::ContainerInspect;

use super::{CniGateway, CniResult, Error, NetworkConfigList, PluginState, Result};

/// CNI error document a failing plugin prints on stdout.
#[derive(Debug, serde::Deserialize)]
struct PluginError {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

/// Executes plugin binaries from a directory for networks configured in another.
#[derive(Debug, Clone)]
pub struct CniExec {
    conf_dir: PathBuf,
    bin_dir: PathBuf,
    proc_root: PathBuf,
    bundle_paths: Vec<String>,
    interface_name: String,
}

impl CniExec {
    pub fn new(config: &Config) -> Self {
        Self {
            conf_dir: config.cni_conf_dir.clone(),
            bin_dir: config.cni_bin_dir.clone(),
            proc_root: config.proc_root.clone(),
            bundle_paths: config.bundle_paths.clone(),
            interface_name: config.interface_name.clone(),
        }
    }

    fn netns_path(&self, pid: u32) -> String {
        if pid == 0 {
            return String::new();
        }
        self.proc_root
            .join(pid.to_string())
            .join("ns/net")
            .to_string_lossy()
            .into_owned()
    }

    /// Runs one plugin with `command` and returns its parsed stdout, if any.
    async fn exec_plugin(
        &self,
        command: &str,
        state: &PluginState,
        plugin_type: &str,
        conf: &Value,
    ) -> Result<Option<Value>> {
        let plugin = self.bin_dir.join(plugin_type);
        let stdin = conf.to_string().into_bytes();
        log::debug!(
            "Executing plugin: plugin={}, command={}, cid={}",
            plugin.display(),
            command,
            state.container_id
        );

        let mut child = Command::new(&plugin)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", state.container_id.as_str())
            .env("CNI_NETNS", self.netns_path(state.pid))
            .env("CNI_IFNAME", &self.interface_name)
            .env("CNI_PATH", &self.bin_dir)
            .env("CNI_ARGS", "IgnoreUnknown=1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                plugin: plugin.clone(),
                source,
            })?;

        if let Some(mut input) = child.stdin.take() {
            input
                .write_all(&stdin)
                .await
                .map_err(|source| Error::Spawn {
                    plugin: plugin.clone(),
                    source,
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| Error::Spawn {
                plugin: plugin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(plugin_failure(plugin, output));
        }

        let stdout = output.stdout.trim_ascii();
        if stdout.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(stdout)
            .map(Some)
            .map_err(|source| Error::DecodeResult { plugin, source })
    }
}

fn plugin_failure(plugin: PathBuf, output: std::process::Output) -> Error {
    match serde_json::from_slice::<PluginError>(output.stdout.trim_ascii()) {
        Ok(err) if !err.msg.is_empty() => Error::Plugin {
            plugin,
            code: err.code,
            msg: err.msg,
            details: err.details,
        },
        _ => Error::PluginExit {
            plugin,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        },
    }
}

fn bundle_dir(template: &str, id: &str) -> PathBuf {
    PathBuf::from(template.replace("{id}", id))
}

impl CniGateway for CniExec {
    fn lookup_plugin_state(
        &self,
        inspect: &ContainerInspect,
        network: &str,
    ) -> Result<PluginState> {
        for template in &self.bundle_paths {
            let dir = bundle_dir(template, inspect.id.as_str());
            let spec = dir.join("config.json");
            let exists = spec.try_exists().map_err(|source| Error::BundleLookup {
                path: spec.clone(),
                source,
            })?;
            if exists {
                return Ok(PluginState {
                    container_id: inspect.id.clone(),
                    network: network.to_owned(),
                    bundle_path: Some(dir),
                    pid: inspect.state.pid,
                });
            }
        }

        Err(Error::BundleNotFound(inspect.id.clone()))
    }

    async fn add(&self, state: &PluginState) -> Result<CniResult> {
        let list = NetworkConfigList::load(&self.conf_dir, &state.network)?;

        let mut prev: Option<Value> = None;
        for index in 0..list.plugins.len() {
            let (Some(plugin_type), Some(conf)) = (
                list.plugin_type(index),
                list.plugin_config(index, prev.as_ref()),
            ) else {
                continue;
            };
            if let Some(result) = self.exec_plugin("ADD", state, plugin_type, &conf).await? {
                prev = Some(result);
            }
        }

        prev.map(CniResult::new)
            .ok_or_else(|| Error::EmptyResult(state.network.clone()))
    }

    async fn del(&self, state: &PluginState) -> Result<()> {
        let list = NetworkConfigList::load(&self.conf_dir, &state.network)?;

        // Tear down in reverse order and keep going, every plugin gets the chance to release
        // what it allocated.
        let mut last_error = None;
        for index in (0..list.plugins.len()).rev() {
            let (Some(plugin_type), Some(conf)) =
                (list.plugin_type(index), list.plugin_config(index, None))
            else {
                continue;
            };
            if let Err(err) = self.exec_plugin("DEL", state, plugin_type, &conf).await {
                log::warn!("CNI DEL failed: cid={}, error={}", state.container_id, err);
                last_error = Some(err);
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}
