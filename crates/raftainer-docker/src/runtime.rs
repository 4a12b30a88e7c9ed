use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::RuntimeResult;
use crate::types::{ContainerInfo, ContainerSpec, NetworkInfo};

/// The container engine primitives the reconciler drives.
///
/// List operations take a `key=value` label filter so callers only ever
/// see resources they manage.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// All containers (running or not) matching `label_filter`.
    async fn list_containers(&self, label_filter: &str) -> RuntimeResult<Vec<ContainerInfo>>;

    /// Create a container and return its id. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo>;

    /// Force-remove a container, stopping it first if needed.
    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;

    async fn list_networks(&self, label_filter: &str) -> RuntimeResult<Vec<NetworkInfo>>;

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<NetworkInfo>;

    async fn remove_network(&self, name: &str) -> RuntimeResult<()>;
}
