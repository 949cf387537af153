//! Recording stand-ins for the runtime and the CNI gateway.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::cni::{self, CniGateway, CniResult, PluginState};
use crate::container::{
    ContainerConfig, ContainerID, ContainerInspect, ContainerState, ContainerSummary, HostConfig,
};
use crate::runtime::{self, Runtime};

/// Builds an inspect document. `network` sets the CNI network label.
pub fn inspect(
    id: &str,
    running: bool,
    started_at: &str,
    network: Option<&str>,
) -> ContainerInspect {
    let mut labels = HashMap::new();
    if let Some(network) = network {
        labels.insert("io.rancher.cni.network".to_owned(), network.to_owned());
    }
    ContainerInspect {
        id: ContainerID::new(id).unwrap(),
        state: ContainerState {
            running,
            started_at: started_at.to_owned(),
            pid: if running { 100 } else { 0 },
        },
        host_config: HostConfig {
            network_mode: "default".to_owned(),
        },
        config: ContainerConfig::new(id, labels),
        hosts_path: None,
    }
}

/// Writes a `/proc/<pid>/net/dev` file listing `interfaces`.
pub fn write_net_dev(proc_root: &Path, pid: u32, interfaces: &[&str]) {
    let dir = proc_root.join(pid.to_string()).join("net");
    std::fs::create_dir_all(&dir).unwrap();
    let mut content = String::from(
        "Inter-|   Receive                            |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes\n",
    );
    for iface in interfaces {
        content.push_str(&format!("{iface:>6}: 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n"));
    }
    std::fs::write(dir.join("dev"), content).unwrap();
}

#[derive(Debug, Default)]
pub struct StubRuntime {
    containers: Mutex<HashMap<String, ContainerInspect>>,
    inspects: Mutex<HashMap<String, usize>>,
}

impl StubRuntime {
    pub fn set(&self, inspect: ContainerInspect) {
        self.containers
            .lock()
            .unwrap()
            .insert(inspect.id.to_string(), inspect);
    }

    pub fn remove(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    pub fn inspect_count(&self, id: &str) -> usize {
        self.inspects.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl Runtime for StubRuntime {
    async fn list_containers(&self) -> runtime::Result<Vec<ContainerSummary>> {
        let containers = self.containers.lock().unwrap();
        let mut summaries: Vec<ContainerSummary> = containers
            .values()
            .map(|inspect| ContainerSummary {
                id: inspect.id.clone(),
                state: if inspect.state.running {
                    "running".to_owned()
                } else {
                    "exited".to_owned()
                },
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn inspect(&self, id: &ContainerID) -> runtime::Result<Option<ContainerInspect>> {
        *self
            .inspects
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default() += 1;
        Ok(self.containers.lock().unwrap().get(id.as_str()).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Del,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub op: Op,
    pub id: String,
    pub pid: u32,
    pub bundle: bool,
    pub at: tokio::time::Instant,
}

/// Gateway that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct StubGateway {
    calls: Mutex<Vec<GatewayCall>>,
    /// Number of upcoming ADD calls that fail, `u32::MAX` fails forever.
    add_failures: AtomicU32,
    fail_del: AtomicBool,
    missing_bundle: AtomicBool,
    add_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubGateway {
    pub fn fail_adds(&self, count: u32) {
        self.add_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_dels(&self) {
        self.fail_del.store(true, Ordering::SeqCst);
    }

    pub fn without_bundles(&self) {
        self.missing_bundle.store(true, Ordering::SeqCst);
    }

    pub fn delay_adds(&self, delay: Duration) {
        *self.add_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls reduced to `(op, id, pid)` for comparisons.
    pub fn ops(&self) -> Vec<(Op, String, u32)> {
        self.calls()
            .into_iter()
            .map(|call| (call.op, call.id, call.pid))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, op: Op, state: &PluginState) {
        self.calls.lock().unwrap().push(GatewayCall {
            op,
            id: state.container_id.to_string(),
            pid: state.pid,
            bundle: state.bundle_path.is_some(),
            at: tokio::time::Instant::now(),
        });
    }
}

impl CniGateway for StubGateway {
    fn lookup_plugin_state(
        &self,
        inspect: &ContainerInspect,
        network: &str,
    ) -> cni::Result<PluginState> {
        if self.missing_bundle.load(Ordering::SeqCst) {
            return Err(cni::Error::BundleNotFound(inspect.id.clone()));
        }
        Ok(PluginState {
            container_id: inspect.id.clone(),
            network: network.to_owned(),
            bundle_path: Some(format!("/run/bundles/{}", inspect.id).into()),
            pid: inspect.state.pid,
        })
    }

    async fn add(&self, state: &PluginState) -> cni::Result<CniResult> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.record(Op::Add, state);

        let delay = *self.add_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .add_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(cni::Error::EmptyResult(state.network.clone()));
        }

        Ok(CniResult::new(serde_json::json!({
            "cniVersion": "0.2.0",
            "ip4": {"ip": "10.42.0.9/16"}
        })))
    }

    async fn del(&self, state: &PluginState) -> cni::Result<()> {
        self.record(Op::Del, state);
        if self.fail_del.load(Ordering::SeqCst) {
            return Err(cni::Error::EmptyResult(state.network.clone()));
        }
        Ok(())
    }
}
