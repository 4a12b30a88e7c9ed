//! Store keys, resource names, and runtime labels.
//!
//! Every name Raftainer writes to the coordination store or the container
//! runtime is derived here so the layout stays in one place.

use crate::error::{ModelError, ModelResult};

/// Prefix holding one JSON pod definition per key.
pub const PODS_CONFIG_PREFIX: &str = "raftainer/pods/configs";

/// Prefix holding per-pod slot lock keys.
pub const PODS_LOCK_PREFIX: &str = "raftainer/pods/locks";

/// Name of the host session in the coordination store.
pub const HOST_SESSION_NAME: &str = "Raftainer Host";

/// Value of the orchestrator marker label.
pub const ORCHESTRATOR_NAME: &str = "Raftainer";

/// Tag carried by every service this system registers.
pub const SERVICE_TAG: &str = "raftainer";

/// Runtime label keys applied to managed containers and networks.
pub mod labels {
    pub const ORCHESTRATOR: &str = "OrchestratorName";
    pub const POD_NAME: &str = "PodName";
    pub const CONTAINER_NAME: &str = "PodContainerName";
    pub const CONFIG_HASH: &str = "ConfigHash";
    /// Minimum dynamic credential TTL in seconds, when any were issued.
    pub const CREDENTIAL_TTL: &str = "CredentialTtl";
    /// Unix seconds at which the container was created.
    pub const STARTED_AT: &str = "StartedAt";

    /// Label filter (`key=value`) selecting everything Raftainer manages.
    pub fn orchestrator_filter() -> String {
        format!("{ORCHESTRATOR}={}", super::ORCHESTRATOR_NAME)
    }
}

/// Store key of a pod definition.
pub fn config_key(pod_name: &str) -> String {
    format!("{PODS_CONFIG_PREFIX}/{pod_name}")
}

/// Name of the single network a pod's containers share.
pub fn network_name(pod_name: &str) -> String {
    format!("Raftainer-{pod_name}")
}

/// Runtime name of a pod's container.
pub fn container_name(pod_name: &str, container: &str) -> String {
    format!("{pod_name}.{container}")
}

/// Service id of a pod's health-checked entry.
pub fn pod_service_id(pod_name: &str) -> String {
    format!("raftainer-{pod_name}-pod")
}

/// Service id of an internally routed port.
pub fn port_service_id(pod_name: &str, port_name: &str) -> String {
    format!("raftainer-{pod_name}-{port_name}")
}

/// A slot lock key: `raftainer/pods/locks/<pod>/<slot>.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pod: String,
    slot: u32,
}

impl LockKey {
    pub fn new(pod: impl Into<String>, slot: u32) -> Self {
        Self {
            pod: pod.into(),
            slot,
        }
    }

    /// Parse a key previously produced by [`LockKey::as_key`].
    pub fn parse(key: &str) -> ModelResult<Self> {
        let bad = || ModelError::LockKey(key.to_string());
        let rest = key
            .strip_prefix(PODS_LOCK_PREFIX)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(bad)?;
        let (pod, file) = rest.rsplit_once('/').ok_or_else(bad)?;
        let slot = file
            .strip_suffix(".lock")
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(bad)?;
        if pod.is_empty() {
            return Err(bad());
        }
        Ok(Self::new(pod, slot))
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Whether this slot is usable under a pod's current instance bound.
    ///
    /// Compares slot indices numerically; key strings do not sort by slot
    /// once indices have different digit counts.
    pub fn within(&self, max_instances: u32) -> bool {
        self.slot < max_instances
    }

    pub fn as_key(&self) -> String {
        format!("{PODS_LOCK_PREFIX}/{}/{}.lock", self.pod, self.slot)
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}
