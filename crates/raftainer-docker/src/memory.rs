//! In-process container runtime that records what it was asked to do.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

#[derive(Debug, Clone)]
struct StoredContainer {
    info: ContainerInfo,
    spec: Option<ContainerSpec>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    containers: BTreeMap<String, StoredContainer>,
    networks: BTreeMap<String, NetworkInfo>,
    bad_images: HashSet<String>,
    stuck: HashSet<String>,
    failing_starts: HashSet<String>,
    failing_inspects: HashSet<String>,
    pulls: u64,
    creates: u64,
    starts: u64,
    removes: u64,
}

/// Containers live in a map keyed by id; networks by name.
///
/// Failure injection: [`fail_image`](Self::fail_image) makes creation from
/// an image fail, [`fail_removal`](Self::fail_removal) makes removal of a
/// container or network (by name) fail. [`fail_start`](Self::fail_start)
/// and [`fail_next_inspect`](Self::fail_next_inspect) target containers by
/// name; the inspect failure fires once.
#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_image(&self, image: &str) {
        self.lock().bad_images.insert(image.to_string());
    }

    pub fn fail_removal(&self, name: &str) {
        self.lock().stuck.insert(name.to_string());
    }

    pub fn fail_start(&self, name: &str) {
        self.lock().failing_starts.insert(name.to_string());
    }

    pub fn fail_next_inspect(&self, name: &str) {
        self.lock().failing_inspects.insert(name.to_string());
    }

    /// Add a pre-existing container, e.g. left over from a previous run.
    pub fn insert_container(&self, name: &str, labels: HashMap<String, String>, state: &str) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("c{}", inner.next_id);
        let info = ContainerInfo {
            id: id.clone(),
            name: name.to_string(),
            labels,
            state: state.to_string(),
        };
        inner
            .containers
            .insert(id.clone(), StoredContainer { info, spec: None });
        id
    }

    pub fn insert_network(&self, name: &str, labels: HashMap<String, String>) {
        self.lock().networks.insert(
            name.to_string(),
            NetworkInfo {
                name: name.to_string(),
                labels,
            },
        );
    }

    /// Mark a container as exited.
    pub fn stop(&self, name: &str) {
        let mut inner = self.lock();
        if let Some(c) = inner.containers.values_mut().find(|c| c.info.name == name) {
            c.info.state = "exited".to_string();
        }
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.lock()
            .containers
            .values()
            .find(|c| c.info.name == name)
            .map(|c| c.info.clone())
    }

    /// The spec a container was created from.
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.lock()
            .containers
            .values()
            .find(|c| c.info.name == name)
            .and_then(|c| c.spec.clone())
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .lock()
            .containers
            .values()
            .map(|c| c.info.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn network_names(&self) -> Vec<String> {
        self.lock().networks.keys().cloned().collect()
    }

    pub fn pulls(&self) -> u64 {
        self.lock().pulls
    }

    pub fn creates(&self) -> u64 {
        self.lock().creates
    }

    pub fn starts(&self) -> u64 {
        self.lock().starts
    }

    pub fn removes(&self) -> u64 {
        self.lock().removes
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn pull_image(&self, _image: &str) -> RuntimeResult<()> {
        self.lock().pulls += 1;
        Ok(())
    }

    async fn list_containers(&self, filter: &str) -> RuntimeResult<Vec<ContainerInfo>> {
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|c| matches_filter(&c.info.labels, filter))
            .map(|c| c.info.clone())
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut inner = self.lock();
        if inner.bad_images.contains(&spec.image) {
            return Err(RuntimeError::NotFound {
                kind: "image",
                name: spec.image.clone(),
            });
        }
        if inner.containers.values().any(|c| c.info.name == spec.name) {
            return Err(RuntimeError::Conflict {
                kind: "container",
                name: spec.name.clone(),
            });
        }
        if !inner.networks.contains_key(&spec.network) {
            return Err(RuntimeError::NotFound {
                kind: "network",
                name: spec.network.clone(),
            });
        }
        inner.creates += 1;
        inner.next_id += 1;
        let id = format!("c{}", inner.next_id);
        let info = ContainerInfo {
            id: id.clone(),
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            state: "created".to_string(),
        };
        inner.containers.insert(
            id.clone(),
            StoredContainer {
                info,
                spec: Some(spec.clone()),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.starts += 1;
        let container = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "container",
                name: id.to_string(),
            })?;
        if inner.failing_starts.contains(&container.info.name) {
            return Err(RuntimeError::Docker(format!(
                "container {} exited during start",
                container.info.name
            )));
        }
        container.info.state = "running".to_string();
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let mut inner = self.lock();
        let info = inner
            .containers
            .get(id)
            .map(|c| c.info.clone())
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "container",
                name: id.to_string(),
            })?;
        if inner.failing_inspects.remove(&info.name) {
            return Err(RuntimeError::Docker(format!("inspect of {} timed out", info.name)));
        }
        Ok(info)
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.removes += 1;
        let Some(container) = inner.containers.get(id) else {
            return Err(RuntimeError::NotFound {
                kind: "container",
                name: id.to_string(),
            });
        };
        if inner.stuck.contains(&container.info.name) {
            return Err(RuntimeError::Docker(format!(
                "removal of {} is in progress",
                container.info.name
            )));
        }
        inner.containers.remove(id);
        Ok(())
    }

    async fn list_networks(&self, filter: &str) -> RuntimeResult<Vec<NetworkInfo>> {
        Ok(self
            .lock()
            .networks
            .values()
            .filter(|n| matches_filter(&n.labels, filter))
            .cloned()
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<NetworkInfo> {
        let mut inner = self.lock();
        if inner.networks.contains_key(name) {
            return Err(RuntimeError::Conflict {
                kind: "network",
                name: name.to_string(),
            });
        }
        let network = NetworkInfo {
            name: name.to_string(),
            labels: labels.clone(),
        };
        inner.networks.insert(name.to_string(), network.clone());
        Ok(network)
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        let mut inner = self.lock();
        if inner.stuck.contains(name) {
            return Err(RuntimeError::Docker(format!(
                "network {name} has active endpoints"
            )));
        }
        inner
            .networks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "network",
                name: name.to_string(),
            })
    }
}
