//! Container and network reconciler.
//!
//! Makes the local runtime match the pods this host holds: one network
//! per pod, one container per container spec, and nothing else carrying
//! the orchestrator label. Every resource is found again through its
//! labels, so reconciliation survives restarts of this process.

mod containers;
mod env;
mod networks;

use std::sync::Arc;
use std::time::Duration;

use raftainer_docker::{ContainerRuntime, NetworkInfo};
use raftainer_model::HostIdentity;
use raftainer_vault::Vault;

/// A container that is running (or has run, for startup containers) as
/// part of a launched pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedContainer {
    pub name: String,
    pub id: String,
    pub state: String,
    /// An existing container was kept instead of creating a new one.
    pub reused: bool,
}

/// Outcome of an orphan cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// Resource name and the error that kept it from being removed.
    pub failed: Vec<(String, String)>,
}

/// Drives the container runtime on behalf of one host.
pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    secrets: Arc<Vault>,
    host: HostIdentity,
    rotation_margin: Duration,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        secrets: Arc<Vault>,
        host: HostIdentity,
        rotation_margin: Duration,
    ) -> Self {
        Self {
            runtime,
            secrets,
            host,
            rotation_margin,
        }
    }
}

/// Handle of the network a pod's containers join.
pub type PodNetwork = NetworkInfo;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use raftainer_docker::MemoryRuntime;
    use raftainer_model::{ConsulPodEntry, Container, Pod};
    use raftainer_vault::{AppRole, MemorySecrets};

    pub(crate) fn host() -> HostIdentity {
        HostIdentity {
            name: "node-a".to_string(),
            region: "IAD".to_string(),
            secure_ip: Some("10.8.0.3".parse().unwrap()),
            internal_ip: "192.168.1.10".parse().unwrap(),
        }
    }

    pub(crate) fn fixture() -> (Arc<MemoryRuntime>, Arc<MemorySecrets>, Reconciler) {
        let runtime = Arc::new(MemoryRuntime::new());
        let secrets = Arc::new(MemorySecrets::new(Duration::from_secs(3600)));
        let vault = Arc::new(Vault::new(secrets.clone(), AppRole::default()));
        let reconciler = Reconciler::new(runtime.clone(), vault, host(), Duration::from_secs(60));
        (runtime, secrets, reconciler)
    }

    pub(crate) fn pod_entry(name: &str, containers: Vec<Container>) -> ConsulPodEntry {
        ConsulPodEntry {
            key: raftainer_model::naming::config_key(name),
            pod: Pod {
                name: name.to_string(),
                containers,
                max_instances: 1,
                allowed_hosts: None,
                allowed_regions: None,
            },
        }
    }
}
