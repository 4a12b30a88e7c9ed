//! Pod definitions as published in the coordination store.
//!
//! All types are JSON-serialized with camelCase field names, matching the
//! documents operators upload under `raftainer/pods/configs/`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::env::EnvValue;
use crate::error::{ModelError, ModelResult};

// ── Pod ───────────────────────────────────────────────────────────

/// A named group of containers deployed and locked as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Unique key within the store.
    pub name: String,
    /// Containers, launched in declared order.
    pub containers: Vec<Container>,
    /// Fleet-wide upper bound on concurrently held slot locks.
    pub max_instances: u32,
    /// Hosts this pod may run on (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    /// Regions this pod may run on (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_regions: Option<Vec<String>>,
}

impl Pod {
    /// Decode and validate a pod from its JSON document.
    pub fn from_json(bytes: &[u8]) -> ModelResult<Self> {
        let pod: Pod = serde_json::from_slice(bytes)?;
        pod.validate()?;
        Ok(pod)
    }

    /// Check structural invariants the store cannot enforce.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |reason: &str| ModelError::Invalid {
            pod: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.name.contains('/') {
            return Err(invalid("name must not contain '/'"));
        }
        if self.max_instances == 0 {
            return Err(invalid("maxInstances must be positive"));
        }

        let mut seen = HashSet::new();
        for container in &self.containers {
            if !seen.insert(container.name.as_str()) {
                return Err(invalid(&format!(
                    "duplicate container name '{}'",
                    container.name
                )));
            }
        }
        Ok(())
    }

    /// All GPU requirements declared across the pod's containers, in order.
    pub fn gpu_constraints(&self) -> Vec<&GpuConstraint> {
        self.containers
            .iter()
            .filter_map(|c| c.hardware_constraints.as_ref())
            .flat_map(|h| h.gpus.iter())
            .collect()
    }
}

// ── Container ─────────────────────────────────────────────────────

/// Lifecycle class of a container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ContainerType {
    /// Run once, never restarted.
    PodStartup,
    /// Restarted unless explicitly stopped.
    #[default]
    LongRunning,
}

/// Configuration for one container in a pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Unique within the pod.
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub environment: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub ports: Vec<ExposedPort>,
    #[serde(default)]
    pub local_volumes: Vec<LocalVolume>,
    #[serde(default)]
    pub container_type: ContainerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_add: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_constraints: Option<HardwareConstraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Container {
    /// Whether any GPU device must be attached to this container.
    pub fn requires_gpu(&self) -> bool {
        self.hardware_constraints
            .as_ref()
            .is_some_and(|h| !h.gpus.is_empty())
    }
}

/// A host directory mounted into the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolume {
    pub host_path: String,
    pub container_path: String,
    /// Mount mode, e.g. `ro` or `rw`.
    #[serde(default = "default_volume_mode")]
    pub mode: String,
}

fn default_volume_mode() -> String {
    "rw".to_string()
}

/// Hardware a container needs from its host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HardwareConstraints {
    #[serde(default)]
    pub gpus: Vec<GpuConstraint>,
}

/// Minimum GPU count and, optionally, minimum VRAM on at least one GPU.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GpuConstraint {
    pub gpu_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_bytes: Option<u64>,
}

// ── Ports ─────────────────────────────────────────────────────────

/// Application protocol of an exposed port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Udp,
}

impl Protocol {
    /// Transport protocol at the runtime level: HTTP(S) ride on TCP.
    pub fn transport(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Http | Protocol::Https | Protocol::Tcp => "tcp",
        }
    }
}

/// A port a container exposes to the outside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    /// Name of the service the port exposes (e.g. `ui`).
    pub name: String,
    pub protocol: Protocol,
    /// The port inside the container.
    pub container_port: u16,
    #[serde(flatten)]
    pub port_type: PortType,
}

/// Where an exposed port is bound on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "portType")]
pub enum PortType {
    /// Bound only on the host's secure interface.
    Internal {
        #[serde(rename = "internalPort")]
        internal_port: u16,
        /// Routing hint published with the service registration.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
    },
    /// Bound on the host's primary interface.
    External {
        #[serde(rename = "externalPort")]
        external_port: u16,
    },
    /// Any type this version does not understand; such ports are skipped.
    #[serde(other)]
    Unknown,
}

// ── Store records ─────────────────────────────────────────────────

/// A desired-state record: store key + decoded pod.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsulPodEntry {
    pub key: String,
    pub pod: Pod,
}

impl ConsulPodEntry {
    pub fn name(&self) -> &str {
        &self.pod.name
    }
}
