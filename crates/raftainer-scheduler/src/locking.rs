//! Slot lock protocol.
//!
//! A pod with `maxInstances = n` has lock keys
//! `raftainer/pods/locks/<pod>/0.lock` .. `<n-1>.lock`. A host runs the pod
//! only while it holds one of them through its session. The store's
//! session-scoped acquire is the only source of mutual exclusion.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use raftainer_consul::CoordinationStore;
use raftainer_model::naming::LockKey;
use raftainer_model::{ConsulPodEntry, HostIdentity};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::SchedulerResult;

/// A desired pod plus the slot this host holds for it.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedPodEntry {
    pub entry: ConsulPodEntry,
    pub lock: LockKey,
}

impl LockedPodEntry {
    pub fn name(&self) -> &str {
        self.entry.name()
    }
}

/// Last slot held per pod, so later passes retry the same slot first.
///
/// Advisory only: losing it costs slot churn, never correctness.
#[derive(Debug, Clone, Default)]
pub struct PodLockCache {
    slots: HashMap<String, LockKey>,
}

impl PodLockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pod: &str) -> Option<&LockKey> {
        self.slots.get(pod)
    }

    /// Record `lock` as the slot held for its pod, returning the previous one.
    pub fn insert(&mut self, lock: LockKey) -> Option<LockKey> {
        self.slots.insert(lock.pod().to_string(), lock)
    }

    pub fn remove(&mut self, pod: &str) -> Option<LockKey> {
        self.slots.remove(pod)
    }

    /// Every recorded slot.
    pub fn locks(&self) -> Vec<LockKey> {
        self.slots.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Value written to a slot key while held.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockHolder {
    pub holder: String,
    pub host: String,
    pub region: String,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// Value written to a slot key when it is given up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRelease {
    /// Why the slot was given up; empty for a clean release.
    pub error: String,
    pub host: String,
    pub region: String,
    pub timestamp: u64,
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn try_lock(
    store: &dyn CoordinationStore,
    session: &str,
    host: &HostIdentity,
    lock: &LockKey,
) -> SchedulerResult<bool> {
    let value = serde_json::to_vec(&LockHolder {
        holder: session.to_string(),
        host: host.name.clone(),
        region: host.region.clone(),
        timestamp: epoch_millis(),
    })?;
    let acquired = store.acquire(&lock.as_key(), &value, session).await?;
    debug!(lock_key = %lock, acquired, "lock attempt");
    Ok(acquired)
}

/// Try to take a slot for `entry`.
///
/// The slot cached from an earlier pass is tried first if it is still
/// below the pod's current `maxInstances`; then the other slots of
/// `0..maxInstances` in order, so at most `maxInstances` acquires are made.
/// Returns `None` when every slot is held elsewhere.
pub async fn try_lock_pod(
    store: &dyn CoordinationStore,
    session: &str,
    host: &HostIdentity,
    cache: &PodLockCache,
    entry: &ConsulPodEntry,
) -> SchedulerResult<Option<LockedPodEntry>> {
    let pod = entry.name();
    let max = entry.pod.max_instances;

    let locked = |lock: LockKey| LockedPodEntry {
        entry: entry.clone(),
        lock,
    };

    let mut tried = None;
    match cache.get(pod) {
        Some(previous) if previous.within(max) => {
            if try_lock(store, session, host, previous).await? {
                debug!(%pod, lock_key = %previous, "re-acquired previous slot");
                return Ok(Some(locked(previous.clone())));
            }
            tried = Some(previous.slot());
        }
        Some(previous) => {
            debug!(%pod, lock_key = %previous, max_instances = max, "previous slot out of range");
        }
        None => {}
    }

    for slot in (0..max).filter(|slot| Some(*slot) != tried) {
        let lock = LockKey::new(pod, slot);
        if try_lock(store, session, host, &lock).await? {
            debug!(%pod, lock_key = %lock, "acquired slot");
            return Ok(Some(locked(lock)));
        }
    }

    debug!(%pod, max_instances = max, "all slots held elsewhere");
    Ok(None)
}

/// Give up `lock`, recording `reason` in the key.
///
/// Failures are logged only; if this host disappears the session TTL
/// reclaims the slot anyway.
pub async fn release_pod(
    store: &dyn CoordinationStore,
    session: &str,
    host: &HostIdentity,
    lock: &LockKey,
    reason: &str,
) {
    let pod = lock.pod();
    let release = LockRelease {
        error: reason.to_string(),
        host: host.name.clone(),
        region: host.region.clone(),
        timestamp: epoch_millis(),
    };
    let value = match serde_json::to_vec(&release) {
        Ok(v) => v,
        Err(e) => {
            error!(%pod, error = %e, "failed to encode lock release");
            return;
        }
    };

    match store.release(&lock.as_key(), &value, session).await {
        Ok(true) => info!(%pod, lock_key = %lock, "released pod lock"),
        Ok(false) => info!(%pod, lock_key = %lock, "pod lock was not held by this session"),
        Err(e) => error!(%pod, lock_key = %lock, error = %e, "failed to release pod lock"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftainer_consul::{MemoryStore, SessionRequest};
    use raftainer_model::Pod;
    use std::time::Duration;

    fn host() -> HostIdentity {
        HostIdentity {
            name: "node-a".to_string(),
            region: "IAD".to_string(),
            secure_ip: None,
            internal_ip: "10.0.0.1".parse().unwrap(),
        }
    }

    fn entry(name: &str, max_instances: u32) -> ConsulPodEntry {
        ConsulPodEntry {
            key: raftainer_model::naming::config_key(name),
            pod: Pod {
                name: name.to_string(),
                containers: Vec::new(),
                max_instances,
                allowed_hosts: None,
                allowed_regions: None,
            },
        }
    }

    async fn session(store: &MemoryStore, node: &str) -> String {
        store
            .create_session(&SessionRequest {
                name: "Raftainer Host".to_string(),
                node: node.to_string(),
                ttl: Duration::from_secs(90),
                lock_delay: Duration::from_secs(10),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_free_slot_is_taken_in_order() {
        let store = MemoryStore::new();
        let other = session(&store, "node-b").await;
        let mine = session(&store, "node-a").await;
        store
            .acquire("raftainer/pods/locks/web/0.lock", b"{}", &other)
            .await
            .unwrap();

        let locked = try_lock_pod(&store, &mine, &host(), &PodLockCache::new(), &entry("web", 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.lock, LockKey::new("web", 1));

        let value: LockHolder =
            serde_json::from_slice(&store.value("raftainer/pods/locks/web/1.lock").unwrap()).unwrap();
        assert_eq!(value.holder, mine);
        assert_eq!(value.host, "node-a");
        assert_eq!(value.region, "IAD");
    }

    #[tokio::test]
    async fn all_slots_held_makes_exactly_n_attempts() {
        let store = MemoryStore::new();
        let other = session(&store, "node-b").await;
        let mine = session(&store, "node-a").await;
        for slot in 0..3 {
            store
                .acquire(&LockKey::new("web", slot).as_key(), b"{}", &other)
                .await
                .unwrap();
        }
        let before = store.acquire_calls();

        let locked = try_lock_pod(&store, &mine, &host(), &PodLockCache::new(), &entry("web", 3))
            .await
            .unwrap();
        assert!(locked.is_none());
        assert_eq!(store.acquire_calls() - before, 3);
    }

    #[tokio::test]
    async fn held_cached_slot_is_not_tried_twice() {
        let store = MemoryStore::new();
        let other = session(&store, "node-b").await;
        let mine = session(&store, "node-a").await;
        for slot in 0..3 {
            store
                .acquire(&LockKey::new("web", slot).as_key(), b"{}", &other)
                .await
                .unwrap();
        }
        let mut cache = PodLockCache::new();
        cache.insert(LockKey::new("web", 1));
        let before = store.acquire_calls();

        let locked = try_lock_pod(&store, &mine, &host(), &cache, &entry("web", 3))
            .await
            .unwrap();
        assert!(locked.is_none());
        assert_eq!(store.acquire_calls() - before, 3);
    }

    #[tokio::test]
    async fn cached_slot_is_preferred() {
        let store = MemoryStore::new();
        let mine = session(&store, "node-a").await;
        let mut cache = PodLockCache::new();
        cache.insert(LockKey::new("web", 2));

        let locked = try_lock_pod(&store, &mine, &host(), &cache, &entry("web", 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.lock.slot(), 2);
        assert_eq!(store.acquire_calls(), 1);
    }

    #[tokio::test]
    async fn cached_slot_beyond_bound_is_skipped() {
        let store = MemoryStore::new();
        let mine = session(&store, "node-a").await;
        let mut cache = PodLockCache::new();
        cache.insert(LockKey::new("web", 2));

        let locked = try_lock_pod(&store, &mine, &host(), &cache, &entry("web", 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.lock.slot(), 0);
        assert!(store.holder("raftainer/pods/locks/web/2.lock").is_none());
    }

    #[tokio::test]
    async fn cached_slot_reuse_is_numeric() {
        let store = MemoryStore::new();
        let mine = session(&store, "node-a").await;
        let mut cache = PodLockCache::new();
        cache.insert(LockKey::new("web", 9));

        let locked = try_lock_pod(&store, &mine, &host(), &cache, &entry("web", 10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.lock.slot(), 9);
    }

    #[tokio::test]
    async fn release_records_error_and_frees_slot() {
        let store = MemoryStore::new();
        let mine = session(&store, "node-a").await;
        let locked = try_lock_pod(&store, &mine, &host(), &PodLockCache::new(), &entry("web", 1))
            .await
            .unwrap()
            .unwrap();

        release_pod(&store, &mine, &host(), &locked.lock, "image not found").await;

        let key = locked.lock.as_key();
        assert!(store.holder(&key).is_none());
        let value: LockRelease = serde_json::from_slice(&store.value(&key).unwrap()).unwrap();
        assert_eq!(value.error, "image not found");
        assert_eq!(value.host, "node-a");
    }
}
