use std::collections::{HashMap, HashSet};

use raftainer_model::ConsulPodEntry;
use raftainer_model::naming::{ORCHESTRATOR_NAME, labels, network_name};
use tracing::{debug, info, warn};

use super::{CleanupReport, PodNetwork, Reconciler};
use crate::error::SchedulerResult;

impl Reconciler {
    /// The pod's network, created if it does not exist yet.
    ///
    /// An existing network is reused as-is.
    pub async fn launch_pod_network(&self, entry: &ConsulPodEntry) -> SchedulerResult<PodNetwork> {
        let name = network_name(entry.name());
        let existing = self
            .runtime
            .list_networks(&labels::orchestrator_filter())
            .await?;
        if let Some(network) = existing.into_iter().find(|n| n.name == name) {
            debug!(pod = %entry.name(), network = %name, "reusing pod network");
            return Ok(network);
        }

        info!(pod = %entry.name(), network = %name, "creating pod network");
        let labels = HashMap::from([
            (labels::ORCHESTRATOR.to_string(), ORCHESTRATOR_NAME.to_string()),
            (labels::POD_NAME.to_string(), entry.name().to_string()),
        ]);
        Ok(self.runtime.create_network(&name, &labels).await?)
    }

    /// Remove every managed network whose pod is not in `active`.
    pub async fn stop_orphaned_networks(
        &self,
        active: &HashSet<String>,
    ) -> SchedulerResult<CleanupReport> {
        let expected: HashSet<String> = active.iter().map(|p| network_name(p)).collect();
        let existing = self
            .runtime
            .list_networks(&labels::orchestrator_filter())
            .await?;

        let mut report = CleanupReport::default();
        for network in existing.into_iter().filter(|n| !expected.contains(&n.name)) {
            match self.runtime.remove_network(&network.name).await {
                Ok(()) => {
                    info!(network = %network.name, "removed orphaned network");
                    report.removed.push(network.name);
                }
                Err(e) => {
                    warn!(network = %network.name, error = %e, "unable to remove orphaned network");
                    report.failed.push((network.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
