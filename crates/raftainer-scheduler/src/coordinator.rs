//! Lock coordinator: one bounded, parallel lock pass over desired pods.

use std::sync::Arc;

use futures_util::future::join_all;
use raftainer_consul::CoordinationStore;
use raftainer_model::{ConsulPodEntry, HostIdentity};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::constraints::ConstraintMatcher;
use crate::error::SchedulerResult;
use crate::locking::{LockedPodEntry, PodLockCache, try_lock_pod};
use crate::ttl_cache::FailureCache;

pub struct LockCoordinator {
    store: Arc<dyn CoordinationStore>,
    host: HostIdentity,
    matcher: ConstraintMatcher,
    concurrency: usize,
}

impl LockCoordinator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        host: HostIdentity,
        matcher: ConstraintMatcher,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            host,
            matcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Take a slot for every desired pod this host may run.
    ///
    /// Pods in the failure cache are skipped, as are pods whose hardware
    /// constraints the host does not meet. At most `concurrency` pods are
    /// checked and locked at once. Per-pod errors count as "not locked",
    /// except a lost session, which fails the whole pass. Acquired slots
    /// are recorded in `lock_cache`.
    pub async fn lock_pods(
        &self,
        entries: &[ConsulPodEntry],
        session: &str,
        lock_cache: &mut PodLockCache,
        failures: &mut FailureCache,
    ) -> SchedulerResult<Vec<LockedPodEntry>> {
        debug!(pods = entries.len(), "attempting to lock pods");

        let candidates: Vec<&ConsulPodEntry> = entries
            .iter()
            .filter(|entry| match failures.get(&entry.pod.name) {
                Some(reason) => {
                    warn!(pod = %entry.name(), %reason, "skipping recently failed pod");
                    false
                }
                None => true,
            })
            .collect();

        let permits = Semaphore::new(self.concurrency);
        let cache: &PodLockCache = lock_cache;
        let attempts = candidates.into_iter().map(|entry| {
            let permits = &permits;
            async move {
                let Ok(_permit) = permits.acquire().await else {
                    return Ok(None);
                };
                if !self.matcher.meets_constraints(entry).await {
                    return Ok(None);
                }
                match try_lock_pod(self.store.as_ref(), session, &self.host, cache, entry).await {
                    Ok(locked) => {
                        if locked.is_none() {
                            debug!(pod = %entry.name(), "no free slot");
                        }
                        Ok(locked)
                    }
                    Err(e) if e.is_session_lost() => Err(e),
                    Err(e) => {
                        error!(pod = %entry.name(), error = %e, "error while trying to lock pod");
                        Ok(None)
                    }
                }
            }
        });
        let mut locked = Vec::new();
        for attempt in join_all(attempts).await {
            match attempt {
                Ok(Some(entry)) => locked.push(entry),
                Ok(None) => {}
                Err(e) => {
                    error!(%session, error = %e, "host session lost during lock pass");
                    return Err(e);
                }
            }
        }

        for entry in &locked {
            lock_cache.insert(entry.lock.clone());
        }
        info!(
            locked = locked.len(),
            pods = ?locked.iter().map(LockedPodEntry::name).collect::<Vec<_>>(),
            %session,
            "acquired pods"
        );
        Ok(locked)
    }
}
