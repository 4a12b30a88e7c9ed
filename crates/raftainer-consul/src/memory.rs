//! In-process coordination store with the same lock semantics as Consul.
//!
//! `MemoryStore` is `Clone` (backed by `Arc`), so several simulated hosts
//! can share one store while each keeps its own catalog instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{CoordinationStore, ServiceCatalog};
use crate::types::*;

#[derive(Debug, Clone)]
struct KvEntry {
    value: Vec<u8>,
    holder: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_session: u64,
    sessions: HashMap<String, SessionInfo>,
    kv: BTreeMap<String, KvEntry>,
    services: BTreeMap<String, ServiceRegistration>,
    checks: HashMap<String, (CheckStatus, Option<String>)>,
    acquire_calls: u64,
    modify_index: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
}

/// Thread-safe in-memory coordination store and service catalog.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        // Indexes start at 1; a query at index 0 always returns immediately.
        let (changes, _) = watch::channel(1);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    modify_index: 1,
                    ..Inner::default()
                }),
                changes,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-update.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self, inner: &mut Inner) {
        inner.modify_index += 1;
        self.shared.changes.send_replace(inner.modify_index);
    }

    // ── Inspection helpers ────────────────────────────────────────

    /// Session currently holding `key`, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.lock().kv.get(key).and_then(|e| e.holder.clone())
    }

    /// Raw value stored at `key`.
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().kv.get(key).map(|e| e.value.clone())
    }

    /// Number of `acquire` calls served so far.
    pub fn acquire_calls(&self) -> u64 {
        self.lock().acquire_calls
    }

    /// Keys held by `session`.
    pub fn held_by(&self, session: &str) -> Vec<String> {
        self.lock()
            .kv
            .iter()
            .filter(|(_, e)| e.holder.as_deref() == Some(session))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Registered service ids.
    pub fn service_ids(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }

    pub fn service(&self, id: &str) -> Option<ServiceRegistration> {
        self.lock().services.get(id).cloned()
    }

    /// Last status set on a check.
    pub fn check_status(&self, check_id: &str) -> Option<CheckStatus> {
        self.lock().checks.get(check_id).map(|(s, _)| *s)
    }

    /// Drop a session as if its TTL had lapsed, releasing its locks.
    pub fn expire_session(&self, session: &str) {
        let mut inner = self.lock();
        Self::drop_session(&mut inner, session);
        self.bump(&mut inner);
    }

    /// Delete a key, as an operator removing a pod definition would.
    pub fn delete_key(&self, key: &str) {
        let mut inner = self.lock();
        inner.kv.remove(key);
        self.bump(&mut inner);
    }

    fn drop_session(inner: &mut Inner, session: &str) {
        inner.sessions.remove(session);
        for entry in inner.kv.values_mut() {
            if entry.holder.as_deref() == Some(session) {
                entry.holder = None;
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create_session(&self, request: &SessionRequest) -> StoreResult<String> {
        let mut inner = self.lock();
        inner.next_session += 1;
        let id = format!("session-{}", inner.next_session);
        inner.sessions.insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                name: request.name.clone(),
                node: request.node.clone(),
            },
        );
        debug!(session = %id, node = %request.node, "memory session created");
        Ok(id)
    }

    async fn renew_session(&self, session: &str) -> StoreResult<()> {
        if self.lock().sessions.contains_key(session) {
            Ok(())
        } else {
            Err(StoreError::SessionNotFound(session.to_string()))
        }
    }

    async fn destroy_session(&self, session: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        Self::drop_session(&mut inner, session);
        self.bump(&mut inner);
        Ok(())
    }

    async fn node_sessions(&self, node: &str) -> StoreResult<Vec<SessionInfo>> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| s.node == node)
            .cloned()
            .collect())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let folder = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .lock()
            .kv
            .keys()
            .filter(|k| k.starts_with(&folder) && k.len() > folder.len())
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.value(key))
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut inner = self.lock();
        let entry = inner.kv.entry(key.to_string()).or_insert(KvEntry {
            value: Vec::new(),
            holder: None,
        });
        entry.value = value.to_vec();
        self.bump(&mut inner);
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &[u8], session: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        inner.acquire_calls += 1;
        if !inner.sessions.contains_key(session) {
            return Err(StoreError::SessionNotFound(session.to_string()));
        }
        let entry = inner.kv.entry(key.to_string()).or_insert(KvEntry {
            value: Vec::new(),
            holder: None,
        });
        match entry.holder.as_deref() {
            Some(holder) if holder != session => return Ok(false),
            _ => {}
        }
        entry.holder = Some(session.to_string());
        entry.value = value.to_vec();
        self.bump(&mut inner);
        Ok(true)
    }

    async fn release(&self, key: &str, value: &[u8], session: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(entry) = inner.kv.get_mut(key) else {
            return Ok(false);
        };
        if entry.holder.as_deref() != Some(session) {
            return Ok(false);
        }
        entry.holder = None;
        entry.value = value.to_vec();
        self.bump(&mut inner);
        Ok(true)
    }

    async fn wait_for_change(&self, _prefix: &str, index: u64, wait: Duration) -> StoreResult<u64> {
        let mut rx = self.shared.changes.subscribe();
        if index == 0 || *rx.borrow_and_update() != index {
            return Ok(*rx.borrow());
        }
        let _ = tokio::time::timeout(wait, rx.changed()).await;
        let current = *rx.borrow();
        Ok(current)
    }
}

#[async_trait]
impl ServiceCatalog for MemoryStore {
    async fn register_service(&self, registration: &ServiceRegistration) -> StoreResult<()> {
        self.lock()
            .services
            .insert(registration.id.clone(), registration.clone());
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.services.remove(service_id);
        inner.checks.remove(&service_check_id(service_id));
        Ok(())
    }

    async fn services(&self) -> StoreResult<Vec<RegisteredService>> {
        Ok(self
            .lock()
            .services
            .values()
            .map(|r| RegisteredService {
                id: r.id.clone(),
                name: r.name.clone(),
                tags: Some(r.tags.clone()),
            })
            .collect())
    }

    async fn update_check(
        &self,
        check_id: &str,
        status: CheckStatus,
        note: Option<&str>,
    ) -> StoreResult<()> {
        self.lock()
            .checks
            .insert(check_id.to_string(), (status, note.map(str::to_string)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(node: &str) -> SessionRequest {
        SessionRequest {
            name: "Raftainer Host".to_string(),
            node: node.to_string(),
            ttl: Duration::from_secs(90),
            lock_delay: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn acquire_is_exclusive_between_sessions() {
        let store = MemoryStore::new();
        let a = store.create_session(&request("a")).await.unwrap();
        let b = store.create_session(&request("b")).await.unwrap();

        assert!(store.acquire("lock/0", b"a", &a).await.unwrap());
        assert!(!store.acquire("lock/0", b"b", &b).await.unwrap());
        // Re-acquiring with the holding session succeeds.
        assert!(store.acquire("lock/0", b"a2", &a).await.unwrap());
        assert_eq!(store.holder("lock/0"), Some(a.clone()));
        assert_eq!(store.acquire_calls(), 3);
    }

    #[tokio::test]
    async fn release_frees_key_for_others() {
        let store = MemoryStore::new();
        let a = store.create_session(&request("a")).await.unwrap();
        let b = store.create_session(&request("b")).await.unwrap();

        store.acquire("lock/0", b"", &a).await.unwrap();
        assert!(!store.release("lock/0", b"x", &b).await.unwrap());
        assert!(store.release("lock/0", b"{\"error\":\"boom\"}", &a).await.unwrap());
        assert_eq!(store.value("lock/0").unwrap(), b"{\"error\":\"boom\"}");
        assert!(store.acquire("lock/0", b"", &b).await.unwrap());
    }

    #[tokio::test]
    async fn expired_session_loses_its_locks() {
        let store = MemoryStore::new();
        let a = store.create_session(&request("a")).await.unwrap();
        store.acquire("lock/0", b"", &a).await.unwrap();

        store.expire_session(&a);
        assert_eq!(store.holder("lock/0"), None);
        assert!(matches!(
            store.renew_session(&a).await,
            Err(StoreError::SessionNotFound(_))
        ));
        assert!(store.acquire("lock/0", b"", &a).await.is_err());
    }

    #[tokio::test]
    async fn keys_lists_children_only() {
        let store = MemoryStore::new();
        store.put("pods/configs/a", b"{}").await.unwrap();
        store.put("pods/configs/b", b"{}").await.unwrap();
        store.put("pods/configsX", b"{}").await.unwrap();

        let keys = store.keys("pods/configs").await.unwrap();
        assert_eq!(keys, vec!["pods/configs/a", "pods/configs/b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_change_returns_on_write() {
        let store = MemoryStore::new();
        let index = store.wait_for_change("p", 0, Duration::from_secs(1)).await.unwrap();
        assert_eq!(index, 1);

        let writer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.put("p/a", b"1").await.unwrap();
        });
        let next = store
            .wait_for_change("p", index, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(next > index);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn catalog_tracks_services_and_checks() {
        let store = MemoryStore::new();
        let reg = ServiceRegistration {
            id: "svc".to_string(),
            name: "svc".to_string(),
            tags: vec!["raftainer".to_string()],
            address: None,
            port: None,
            check: ServiceCheck::default(),
        };
        store.register_service(&reg).await.unwrap();
        store
            .update_check(&reg.check_id(), CheckStatus::Pass, None)
            .await
            .unwrap();
        assert_eq!(store.check_status("service:svc"), Some(CheckStatus::Pass));
        assert!(store.services().await.unwrap()[0].has_tag("raftainer"));

        store.deregister_service("svc").await.unwrap();
        assert!(store.service_ids().is_empty());
        assert_eq!(store.check_status("service:svc"), None);
    }
}
