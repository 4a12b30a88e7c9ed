use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use raftainer_docker::{ContainerInfo, ContainerSpec, PortBinding, RestartPolicy, RuntimeError};
use raftainer_model::naming::{ORCHESTRATOR_NAME, container_name, labels};
use raftainer_model::{Container, ContainerType, ConsulPodEntry, PortType, config_hash};
use tracing::{debug, info, trace, warn};

use super::env::{EnvResolver, ResolvedEnv};
use super::{CleanupReport, LaunchedContainer, PodNetwork, Reconciler};
use crate::error::SchedulerResult;

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn restart_policy(container_type: ContainerType) -> RestartPolicy {
    match container_type {
        ContainerType::PodStartup => RestartPolicy::No,
        ContainerType::LongRunning => RestartPolicy::UnlessStopped,
    }
}

impl Reconciler {
    /// Bring every container of `entry` in line with its spec, in declared
    /// order.
    ///
    /// A container whose stored config hash matches is kept if it is
    /// running, or if it is a run-once startup container. Anything else is
    /// removed and created again. Containers of this pod that no longer
    /// appear in its spec are removed afterwards.
    pub async fn launch_pod_containers(
        &self,
        network: &PodNetwork,
        entry: &ConsulPodEntry,
    ) -> SchedulerResult<Vec<LaunchedContainer>> {
        let pod = entry.name();
        info!(%pod, containers = entry.pod.containers.len(), "launching pod");

        let mut existing: HashMap<String, ContainerInfo> = self
            .runtime
            .list_containers(&labels::orchestrator_filter())
            .await?
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        let mut resolver = EnvResolver::new(&self.secrets, pod, self.host.secure_address());
        let mut launched = Vec::with_capacity(entry.pod.containers.len());
        for container in &entry.pod.containers {
            let name = container_name(pod, &container.name);
            let current = existing.remove(&name);
            launched.push(
                self.launch_container(&mut resolver, network, entry, container, current)
                    .await?,
            );
        }

        for stale in existing
            .into_values()
            .filter(|c| c.label(labels::POD_NAME) == Some(pod))
        {
            info!(%pod, container = %stale.name, "removing container no longer in pod spec");
            if let Err(e) = self.runtime.remove_container(&stale.id).await {
                warn!(%pod, container = %stale.name, error = %e, "failed to remove stale container");
            }
        }

        Ok(launched)
    }

    async fn launch_container(
        &self,
        resolver: &mut EnvResolver<'_>,
        network: &PodNetwork,
        entry: &ConsulPodEntry,
        container: &Container,
        current: Option<ContainerInfo>,
    ) -> SchedulerResult<LaunchedContainer> {
        let name = container_name(entry.name(), &container.name);
        self.runtime.pull_image(&container.image).await?;
        let hash = config_hash(container);

        if let Some(current) = current {
            trace!(container = %name, id = %current.id, "found existing container");
            match self.reuse_existing(&current, container, &hash).await {
                Ok(Some(kept)) => return Ok(kept),
                Ok(None) => {}
                Err(e) => {
                    warn!(container = %name, error = %e, "failed to reconcile existing container, forcing removal");
                    match self.runtime.remove_container(&current.id).await {
                        Ok(()) | Err(RuntimeError::NotFound { .. }) => {}
                        Err(e) => warn!(container = %name, error = %e, "forced removal failed"),
                    }
                }
            }
        }

        let env = resolver.resolve(container).await?;
        let spec = self.container_spec(network, entry, container, &hash, env);
        let id = self.runtime.create_container(&spec).await?;
        debug!(container = %name, %id, "created container");

        if let Err(e) = self.runtime.start_container(&id).await {
            if let Err(cleanup) = self.runtime.remove_container(&id).await {
                warn!(container = %name, error = %cleanup, "failed to remove container that did not start");
            }
            return Err(e.into());
        }
        let info = self.runtime.inspect_container(&id).await?;
        info!(container = %name, %id, state = %info.state, "started container");
        Ok(LaunchedContainer {
            name,
            id,
            state: info.state,
            reused: false,
        })
    }

    /// Keep `current` if it still satisfies the spec, otherwise remove it.
    async fn reuse_existing(
        &self,
        current: &ContainerInfo,
        container: &Container,
        hash: &str,
    ) -> SchedulerResult<Option<LaunchedContainer>> {
        let startup = container.container_type == ContainerType::PodStartup;
        let reason = if current.label(labels::CONFIG_HASH) != Some(hash) {
            "config changed"
        } else if !current.is_running() && !startup {
            "container stopped"
        } else if self.credentials_expiring(current) {
            "credentials expiring"
        } else {
            let info = self.runtime.inspect_container(&current.id).await?;
            debug!(container = %current.name, state = %info.state, "container matches spec");
            return Ok(Some(LaunchedContainer {
                name: current.name.clone(),
                id: info.id,
                state: info.state,
                reused: true,
            }));
        };

        info!(container = %current.name, %reason, "replacing container");
        self.runtime.remove_container(&current.id).await?;
        Ok(None)
    }

    /// Whether the database credentials baked into `current` run out
    /// within the rotation margin.
    fn credentials_expiring(&self, current: &ContainerInfo) -> bool {
        let parse = |key| current.label(key).and_then(|v| v.parse::<u64>().ok());
        let (Some(ttl), Some(started)) = (parse(labels::CREDENTIAL_TTL), parse(labels::STARTED_AT))
        else {
            return false;
        };
        epoch_secs() + self.rotation_margin.as_secs() >= started + ttl
    }

    fn container_spec(
        &self,
        network: &PodNetwork,
        entry: &ConsulPodEntry,
        container: &Container,
        hash: &str,
        env: ResolvedEnv,
    ) -> ContainerSpec {
        let pod = entry.name();
        let name = container_name(pod, &container.name);

        let mut container_labels = HashMap::from([
            (labels::ORCHESTRATOR.to_string(), ORCHESTRATOR_NAME.to_string()),
            (labels::POD_NAME.to_string(), pod.to_string()),
            (labels::CONTAINER_NAME.to_string(), container.name.clone()),
            (labels::CONFIG_HASH.to_string(), hash.to_string()),
            (labels::STARTED_AT.to_string(), epoch_secs().to_string()),
        ]);
        if let Some(ttl) = env.credential_ttl {
            container_labels.insert(labels::CREDENTIAL_TTL.to_string(), ttl.as_secs().to_string());
        }

        let secure_ip = self.host.secure_address().to_string();
        let ports = container
            .ports
            .iter()
            .filter_map(|port| {
                let (host_ip, host_port) = match &port.port_type {
                    PortType::Internal { internal_port, .. } => {
                        (Some(secure_ip.clone()), *internal_port)
                    }
                    PortType::External { external_port } => (None, *external_port),
                    PortType::Unknown => {
                        debug!(container = %name, port = %port.name, "skipping port without a known type");
                        return None;
                    }
                };
                Some(PortBinding {
                    container_port: port.container_port,
                    transport: port.protocol.transport(),
                    host_ip,
                    host_port,
                })
            })
            .collect();

        let gpus = container
            .hardware_constraints
            .as_ref()
            .and_then(|h| h.gpus.iter().map(|g| g.gpu_count.max(1)).max());

        ContainerSpec {
            name: name.clone(),
            image: container.image.clone(),
            env: env.vars,
            entrypoint: container.entrypoint.clone(),
            command: container.command.clone(),
            cap_add: container.cap_add.clone().unwrap_or_default(),
            restart_policy: restart_policy(container.container_type),
            ports,
            binds: container
                .local_volumes
                .iter()
                .map(|v| format!("{}:{}:{}", v.host_path, v.container_path, v.mode))
                .collect(),
            network: network.name.clone(),
            aliases: vec![name, container.name.clone()],
            labels: container_labels,
            gpus,
        }
    }

    /// Remove every managed container whose pod is not in `active`.
    pub async fn stop_orphaned_containers(
        &self,
        active: &HashSet<String>,
    ) -> SchedulerResult<CleanupReport> {
        let existing = self
            .runtime
            .list_containers(&labels::orchestrator_filter())
            .await?;

        let mut report = CleanupReport::default();
        for container in existing.into_iter().filter(|c| {
            c.label(labels::POD_NAME)
                .is_none_or(|pod| !active.contains(pod))
        }) {
            match self.runtime.remove_container(&container.id).await {
                Ok(()) => {
                    info!(container = %container.name, "terminated orphaned container");
                    report.removed.push(container.name);
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "failed to remove orphaned container");
                    report.failed.push((container.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
