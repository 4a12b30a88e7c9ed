//! Runtime-neutral descriptions of containers and networks.

use std::collections::HashMap;

/// A container as listed or inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    /// Name without the leading `/` the engine reports.
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Engine state string: `created`, `running`, `exited`, ...
    pub state: String,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// A network as listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    UnlessStopped,
}

/// One published port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    /// `tcp` or `udp`.
    pub transport: &'static str,
    /// Interface to bind; `None` binds all interfaces.
    pub host_ip: Option<String>,
    pub host_port: u16,
}

impl PortBinding {
    /// Engine port key, e.g. `8080/tcp`.
    pub fn port_key(&self) -> String {
        format!("{}/{}", self.container_port, self.transport)
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub cap_add: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub ports: Vec<PortBinding>,
    /// `host:container:mode` volume binds.
    pub binds: Vec<String>,
    /// Network the container joins.
    pub network: String,
    /// DNS aliases on that network.
    pub aliases: Vec<String>,
    pub labels: HashMap<String, String>,
    /// GPUs to attach, if any.
    pub gpus: Option<u32>,
}

/// Split a `key=value` label filter.
pub(crate) fn split_filter(filter: &str) -> (&str, Option<&str>) {
    match filter.split_once('=') {
        Some((k, v)) => (k, Some(v)),
        None => (filter, None),
    }
}

pub(crate) fn matches_filter(labels: &HashMap<String, String>, filter: &str) -> bool {
    let (key, value) = split_filter(filter);
    match (labels.get(key), value) {
        (Some(actual), Some(expected)) => actual == expected,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
