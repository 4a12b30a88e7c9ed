//! One sync pass: desired state → locks → runtime → service catalog.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use raftainer_consul::{CoordinationStore, ServiceCatalog};
use raftainer_docker::ContainerRuntime;
use raftainer_model::HostIdentity;
use raftainer_model::naming::LockKey;
use raftainer_vault::Vault;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::constraints::ConstraintMatcher;
use crate::coordinator::LockCoordinator;
use crate::desired::get_pods;
use crate::error::{SchedulerError, SchedulerResult};
use crate::locking::{LockedPodEntry, PodLockCache, release_pod};
use crate::reconciler::{CleanupReport, LaunchedContainer, PodNetwork, Reconciler};
use crate::registration::ServiceRegistrar;
use crate::ttl_cache::FailureCache;

/// State carried from one pass to the next. Owned by whoever runs passes,
/// so two passes can never touch it at once.
pub struct SyncState {
    pub lock_cache: PodLockCache,
    pub failures: FailureCache,
}

impl SyncState {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            lock_cache: PodLockCache::new(),
            failures: FailureCache::new(config.failure_ttl),
        }
    }
}

/// A locked pod whose network and containers are up.
#[derive(Debug, Clone)]
pub struct LaunchedPodEntry {
    pub locked: LockedPodEntry,
    pub network: PodNetwork,
    pub containers: Vec<LaunchedContainer>,
}

impl LaunchedPodEntry {
    pub fn name(&self) -> &str {
        self.locked.name()
    }
}

/// What one pass did.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Pods defined in the store.
    pub desired: usize,
    /// Pods this host holds a slot for.
    pub locked: Vec<String>,
    pub launched: Vec<String>,
    /// Pod name and launch error.
    pub failed: Vec<(String, String)>,
    /// Service ids registered after the pass.
    pub services: Vec<String>,
    pub containers: CleanupReport,
    pub networks: CleanupReport,
}

/// Runs sync passes for one host.
pub struct SyncEngine {
    store: Arc<dyn CoordinationStore>,
    catalog: Arc<dyn ServiceCatalog>,
    host: HostIdentity,
    coordinator: LockCoordinator,
    reconciler: Reconciler,
    config: SchedulerConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        catalog: Arc<dyn ServiceCatalog>,
        runtime: Arc<dyn ContainerRuntime>,
        secrets: Arc<Vault>,
        matcher: ConstraintMatcher,
        host: HostIdentity,
        config: SchedulerConfig,
    ) -> Self {
        let coordinator = LockCoordinator::new(
            Arc::clone(&store),
            host.clone(),
            matcher,
            config.lock_concurrency,
        );
        let reconciler = Reconciler::new(
            runtime,
            secrets,
            host.clone(),
            config.credential_rotation_margin,
        );
        Self {
            store,
            catalog,
            host,
            coordinator,
            reconciler,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one full pass under `session`.
    ///
    /// Only reading desired state or losing the session can fail the
    /// pass. Launch failures are
    /// contained per pod: the slot is released with the error, the pod is
    /// skipped for the failure TTL, and the rest of the pass continues.
    pub async fn sync_pods(&self, session: &str, state: &mut SyncState) -> SchedulerResult<SyncReport> {
        let started = Instant::now();
        info!(host = %self.host.name, "starting sync pass");

        let entries = get_pods(self.store.as_ref()).await?;
        let desired: HashSet<&str> = entries.iter().map(|e| e.name()).collect();
        state.failures.retain(|pod| desired.contains(pod.as_str()));
        let mut report = SyncReport {
            desired: entries.len(),
            ..SyncReport::default()
        };

        let previous = state.lock_cache.locks();
        let locked = self
            .coordinator
            .lock_pods(&entries, session, &mut state.lock_cache, &mut state.failures)
            .await?;
        report.locked = locked.iter().map(|l| l.name().to_string()).collect();
        self.release_unused(session, &previous, &locked, &mut state.lock_cache)
            .await;

        let outcomes = join_all(locked.into_iter().map(|locked| self.launch_pod(locked))).await;
        let mut launched = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(pod) => launched.push(pod),
                Err((locked, e)) => {
                    let reason = e.to_string();
                    error!(pod = %locked.name(), error = %reason, "failed to launch pod");
                    state
                        .failures
                        .set(locked.name().to_string(), reason.clone());
                    state.lock_cache.remove(locked.name());
                    release_pod(self.store.as_ref(), session, &self.host, &locked.lock, &reason).await;
                    report.failed.push((locked.name().to_string(), reason));
                }
            }
        }
        report.launched = launched.iter().map(|p| p.name().to_string()).collect();

        let registrar = ServiceRegistrar::new(self.catalog.as_ref(), &self.host, self.config.check_ttl);
        let entries: Vec<_> = launched.iter().map(|p| &p.locked.entry).collect();
        report.services = registrar.register_pods(&entries).await;

        let active: HashSet<String> = report.launched.iter().cloned().collect();
        match self.reconciler.stop_orphaned_containers(&active).await {
            Ok(cleanup) => report.containers = cleanup,
            Err(e) => error!(error = %e, "failed to list containers for cleanup"),
        }
        match self.reconciler.stop_orphaned_networks(&active).await {
            Ok(cleanup) => report.networks = cleanup,
            Err(e) => error!(error = %e, "failed to list networks for cleanup"),
        }

        info!(
            desired = report.desired,
            locked = report.locked.len(),
            launched = report.launched.len(),
            pods = ?report.launched,
            failed = report.failed.len(),
            services = report.services.len(),
            removed_containers = report.containers.removed.len(),
            removed_networks = report.networks.removed.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "sync pass complete"
        );
        Ok(report)
    }

    async fn launch_pod(
        &self,
        locked: LockedPodEntry,
    ) -> Result<LaunchedPodEntry, (LockedPodEntry, SchedulerError)> {
        let network = match self.reconciler.launch_pod_network(&locked.entry).await {
            Ok(network) => network,
            Err(e) => return Err((locked, e)),
        };
        match self
            .reconciler
            .launch_pod_containers(&network, &locked.entry)
            .await
        {
            Ok(containers) => {
                debug!(pod = %locked.name(), containers = containers.len(), "pod launched");
                Ok(LaunchedPodEntry {
                    locked,
                    network,
                    containers,
                })
            }
            Err(e) => Err((locked, e)),
        }
    }

    /// Give up slots held on an earlier pass that this pass did not take
    /// again, e.g. after the pod was deleted or its `maxInstances` shrank.
    async fn release_unused(
        &self,
        session: &str,
        previous: &[LockKey],
        locked: &[LockedPodEntry],
        lock_cache: &mut PodLockCache,
    ) {
        let current: HashSet<&LockKey> = locked.iter().map(|l| &l.lock).collect();
        let kept: HashSet<&str> = locked.iter().map(LockedPodEntry::name).collect();
        for lock in previous.iter().filter(|k| !current.contains(k)) {
            if !kept.contains(lock.pod()) {
                lock_cache.remove(lock.pod());
            }
            warn!(pod = %lock.pod(), lock_key = %lock, "releasing slot no longer in use");
            release_pod(self.store.as_ref(), session, &self.host, lock, "").await;
        }
    }
}
