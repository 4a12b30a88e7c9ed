//! Service registration for launched pods.
//!
//! Each pod gets a heartbeat-checked service the host marks passing on
//! every pass; each internal port additionally gets a TCP-checked service
//! bound to the host's secure address.

use std::collections::HashSet;
use std::time::Duration;

use raftainer_consul::{CheckStatus, ServiceCatalog, ServiceCheck, ServiceRegistration, duration_str};
use raftainer_model::naming::{SERVICE_TAG, pod_service_id, port_service_id};
use raftainer_model::{ConsulPodEntry, HostIdentity, PortType};
use tracing::{debug, error, info};

use crate::error::SchedulerResult;

const PORT_CHECK_INTERVAL: &str = "10s";
const PORT_CHECK_TIMEOUT: &str = "5s";
const PORT_DEREGISTER_AFTER: &str = "5m";

/// Registers launched pods with the local service catalog.
pub struct ServiceRegistrar<'a> {
    catalog: &'a dyn ServiceCatalog,
    host: &'a HostIdentity,
    check_ttl: Duration,
}

impl<'a> ServiceRegistrar<'a> {
    pub fn new(catalog: &'a dyn ServiceCatalog, host: &'a HostIdentity, check_ttl: Duration) -> Self {
        Self {
            catalog,
            host,
            check_ttl,
        }
    }

    fn pod_registration(&self, entry: &ConsulPodEntry) -> ServiceRegistration {
        let pod = entry.name();
        let mut tags = vec![
            SERVICE_TAG.to_string(),
            "raftainer-pod".to_string(),
            "pod".to_string(),
        ];
        tags.extend(self.host.service_tags());
        ServiceRegistration {
            id: pod_service_id(pod),
            name: pod.to_string(),
            tags,
            address: None,
            port: None,
            check: ServiceCheck {
                name: format!("raftainer-{pod}-check"),
                ttl: Some(duration_str(self.check_ttl)),
                timeout: Some(duration_str(self.check_ttl)),
                ..ServiceCheck::default()
            },
        }
    }

    fn port_registrations(&self, entry: &ConsulPodEntry) -> Vec<ServiceRegistration> {
        let pod = entry.name();
        let address = self.host.secure_address().to_string();
        let mut registrations = Vec::new();
        for container in &entry.pod.containers {
            for port in &container.ports {
                let PortType::Internal {
                    internal_port,
                    hostname,
                } = &port.port_type
                else {
                    continue;
                };
                let id = port_service_id(pod, &port.name);
                let mut tags = vec![
                    SERVICE_TAG.to_string(),
                    "raftainer-internal-port".to_string(),
                    "container".to_string(),
                ];
                tags.extend(self.host.service_tags());
                if let Some(hostname) = hostname {
                    tags.push("traefik.enable=true".to_string());
                    tags.push(format!("traefik.http.routers.{id}-router.rule=Host(`{hostname}`)"));
                }
                registrations.push(ServiceRegistration {
                    id,
                    name: pod.to_string(),
                    tags,
                    address: Some(address.clone()),
                    port: Some(*internal_port),
                    check: ServiceCheck {
                        name: format!("raftainer-{pod}-{}-check", container.name),
                        tcp: Some(format!("{address}:{internal_port}")),
                        interval: Some(PORT_CHECK_INTERVAL.to_string()),
                        timeout: Some(PORT_CHECK_TIMEOUT.to_string()),
                        deregister_critical_service_after: Some(PORT_DEREGISTER_AFTER.to_string()),
                        ..ServiceCheck::default()
                    },
                });
            }
        }
        registrations
    }

    async fn register_pod(&self, entry: &ConsulPodEntry) -> SchedulerResult<Vec<String>> {
        let registration = self.pod_registration(entry);
        self.catalog.register_service(&registration).await?;
        self.catalog
            .update_check(&registration.check_id(), CheckStatus::Pass, None)
            .await?;
        debug!(service = %registration.id, "marked pod service healthy");

        let mut ids = vec![registration.id];
        for port in self.port_registrations(entry) {
            self.catalog.register_service(&port).await?;
            info!(service = %port.id, port = ?port.port, "registered internal port");
            ids.push(port.id);
        }
        Ok(ids)
    }

    /// Register every launched pod, then drop any raftainer service that
    /// is not among them. Returns the ids now registered.
    pub async fn register_pods(&self, launched: &[&ConsulPodEntry]) -> Vec<String> {
        let mut active = Vec::new();
        for entry in launched {
            match self.register_pod(entry).await {
                Ok(ids) => active.extend(ids),
                Err(e) => error!(pod = %entry.name(), error = %e, "failed to register pod services"),
            }
        }
        self.deregister_services(&active).await;
        info!(services = active.len(), "synced services");
        active
    }

    /// Remove raftainer-tagged services not in `active`. Per-service
    /// failures are logged.
    pub async fn deregister_services(&self, active: &[String]) -> Vec<String> {
        let keep: HashSet<&str> = active.iter().map(String::as_str).collect();
        let registered = match self.catalog.services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "failed to list registered services");
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for service in registered
            .into_iter()
            .filter(|s| s.has_tag(SERVICE_TAG) && !keep.contains(s.id.as_str()))
        {
            match self.catalog.deregister_service(&service.id).await {
                Ok(()) => {
                    info!(service = %service.id, "deregistered service");
                    removed.push(service.id);
                }
                Err(e) => error!(service = %service.id, error = %e, "failed to deregister service"),
            }
        }
        removed
    }
}
