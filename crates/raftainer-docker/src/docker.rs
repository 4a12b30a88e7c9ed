//! Docker Engine implementation of [`ContainerRuntime`] via bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    DeviceRequest, EndpointSettings, HostConfig, PortBinding as DockerPortBinding,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use futures_util::TryStreamExt;
use tracing::{debug, info, trace};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

/// Client for the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

fn not_found(e: BollardError, kind: &'static str, name: &str) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            kind,
            name: name.to_string(),
        },
        BollardError::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::Conflict {
            kind,
            name: name.to_string(),
        },
        other => other.into(),
    }
}

/// Split an image reference into repository and tag; untagged images
/// default to `latest` so a pull never fetches every tag.
fn image_parts(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn label_filter(filter: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![filter.to_string()])])
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let restart = match spec.restart_policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    let mut port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();
    let mut exposed_ports = HashMap::new();
    for port in &spec.ports {
        exposed_ports.insert(port.port_key(), HashMap::new());
        port_bindings
            .entry(port.port_key())
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(DockerPortBinding {
                host_ip: port.host_ip.clone(),
                host_port: Some(port.host_port.to_string()),
            });
    }

    let device_requests = spec.gpus.map(|count| {
        vec![DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(i64::from(count)),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    let host_config = HostConfig {
        cap_add: Some(spec.cap_add.clone()),
        restart_policy: Some(DockerRestartPolicy {
            name: Some(restart),
            maximum_retry_count: None,
        }),
        port_bindings: Some(port_bindings),
        binds: Some(spec.binds.clone()),
        network_mode: Some(spec.network.clone()),
        device_requests,
        ..Default::default()
    };

    let endpoint = EndpointSettings {
        aliases: Some(spec.aliases.clone()),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        entrypoint: spec.entrypoint.clone(),
        cmd: spec.command.clone(),
        labels: Some(spec.labels.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        networking_config: Some(NetworkingConfig {
            endpoints_config: HashMap::from([(spec.network.clone(), endpoint)]),
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let (repo, tag) = image_parts(image);
        debug!(%image, "pulling image");
        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|progress| async move {
                trace!(status = ?progress.status, "pull progress");
                Ok(())
            })
            .await
            .map_err(|e| RuntimeError::Pull {
                image: image.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list_containers(&self, filter: &str) -> RuntimeResult<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: label_filter(filter),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c.names?.into_iter().next()?;
                Some(ContainerInfo {
                    id: c.id?,
                    name: name.trim_start_matches('/').to_string(),
                    labels: c.labels.unwrap_or_default(),
                    state: c.state.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| not_found(e, "image", &spec.image))?;
        for warning in &created.warnings {
            debug!(container = %spec.name, %warning, "create warning");
        }
        info!(container = %spec.name, id = %created.id, "container created");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found(e, "container", id))
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let inspected = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found(e, "container", id))?;
        let state = inspected
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_default();
        Ok(ContainerInfo {
            id: inspected.id.unwrap_or_else(|| id.to_string()),
            name: inspected
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            labels: inspected
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
            state,
        })
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| not_found(e, "container", id))
    }

    async fn list_networks(&self, filter: &str) -> RuntimeResult<Vec<NetworkInfo>> {
        let options = ListNetworksOptions::<String> {
            filters: label_filter(filter),
        };
        let networks = self.docker.list_networks(Some(options)).await?;
        Ok(networks
            .into_iter()
            .filter_map(|n| {
                Some(NetworkInfo {
                    name: n.name?,
                    labels: n.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<NetworkInfo> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| not_found(e, "network", name))?;
        info!(network = %name, "network created");
        Ok(NetworkInfo {
            name: name.to_string(),
            labels: labels.clone(),
        })
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| not_found(e, "network", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_parts_default_to_latest() {
        assert_eq!(image_parts("nginx"), ("nginx", "latest"));
        assert_eq!(image_parts("nginx:1.27"), ("nginx", "1.27"));
        assert_eq!(
            image_parts("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            image_parts("registry.local:5000/team/app:v2"),
            ("registry.local:5000/team/app", "v2")
        );
        assert_eq!(image_parts("app@sha256:abc"), ("app@sha256:abc", ""));
    }

    #[test]
    fn config_carries_ports_gpus_and_aliases() {
        let spec = ContainerSpec {
            name: "web.api".to_string(),
            image: "api:1".to_string(),
            env: vec!["A=1".to_string()],
            entrypoint: None,
            command: Some(vec!["serve".to_string()]),
            cap_add: vec!["NET_ADMIN".to_string()],
            restart_policy: RestartPolicy::UnlessStopped,
            ports: vec![PortBinding {
                container_port: 8080,
                transport: "tcp",
                host_ip: Some("10.0.0.5".to_string()),
                host_port: 18080,
            }],
            binds: vec!["/data:/data:rw".to_string()],
            network: "Raftainer-web".to_string(),
            aliases: vec!["web.api".to_string(), "api".to_string()],
            labels: HashMap::new(),
            gpus: Some(2),
        };
        let config = container_config(&spec);
        let host = config.host_config.unwrap();

        let bindings = host.port_bindings.unwrap();
        let binding = &bindings["8080/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(binding.host_port.as_deref(), Some("18080"));
        assert_eq!(host.device_requests.unwrap()[0].count, Some(2));
        assert_eq!(host.network_mode.as_deref(), Some("Raftainer-web"));

        let endpoints = config.networking_config.unwrap().endpoints_config;
        assert_eq!(
            endpoints["Raftainer-web"].aliases.as_deref(),
            Some(&["web.api".to_string(), "api".to_string()][..])
        );
    }
}
