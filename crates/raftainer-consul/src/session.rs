//! Host session lifecycle.
//!
//! A host session marks "this host is alive". Every slot lock a host holds
//! is scoped to it, so when the host stops renewing (crash, freeze,
//! partition) the store releases all of its locks after TTL + lock delay.

use std::sync::Arc;
use std::time::Duration;

use raftainer_model::naming::HOST_SESSION_NAME;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::CoordinationStore;
use crate::types::SessionRequest;

/// Session timing and startup behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub lock_delay: Duration,
    pub renew_interval: Duration,
    /// Skip waiting for a previous session of this host to expire.
    pub fast_startup: bool,
    /// Upper bound of the random wait between stale-session checks.
    pub stale_retry_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(90),
            lock_delay: Duration::from_secs(10),
            renew_interval: Duration::from_secs(5),
            fast_startup: false,
            stale_retry_max: Duration::from_secs(10),
        }
    }
}

/// Why the renewal task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalEnd {
    Shutdown,
    /// The store no longer knows the session; every lock it held is gone.
    SessionLost,
}

/// The live session of this host.
pub struct HostSession {
    store: Arc<dyn CoordinationStore>,
    id: String,
    renew_interval: Duration,
}

impl HostSession {
    /// Create the host session for `node`.
    ///
    /// Unless `fast_startup` is set, first waits until no earlier
    /// `"Raftainer Host"` session exists for the node, so a restarted
    /// process does not race locks still held by its previous incarnation.
    pub async fn establish(
        store: Arc<dyn CoordinationStore>,
        node: &str,
        config: &SessionConfig,
    ) -> StoreResult<Self> {
        if !config.fast_startup {
            while store
                .node_sessions(node)
                .await?
                .iter()
                .any(|s| s.name == HOST_SESSION_NAME)
            {
                let delay = jitter(config.stale_retry_max);
                warn!(
                    %node,
                    retry_ms = delay.as_millis() as u64,
                    "node already has a raftainer session, waiting for it to expire"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let request = SessionRequest {
            name: HOST_SESSION_NAME.to_string(),
            node: node.to_string(),
            ttl: config.ttl,
            lock_delay: config.lock_delay,
        };
        let id = store.create_session(&request).await?;
        info!(session = %id, %node, ttl_secs = config.ttl.as_secs(), "host session established");

        Ok(Self {
            store,
            id,
            renew_interval: config.renew_interval,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Renew the session on a fixed interval until `shutdown` fires or the
    /// store reports the session gone.
    ///
    /// Transient failures are logged and retried on the next tick. A session
    /// the store no longer knows cannot be revived, so the task returns
    /// [`RenewalEnd::SessionLost`] and the caller decides how to recover.
    pub fn spawn_renewal(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<RenewalEnd> {
        let store = Arc::clone(&self.store);
        let id = self.id.clone();
        let interval = self.renew_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match store.renew_session(&id).await {
                            Ok(()) => trace!(session = %id, "session renewed"),
                            Err(StoreError::SessionNotFound(_)) => {
                                error!(session = %id, "session expired server-side; held locks were released");
                                return RenewalEnd::SessionLost;
                            }
                            Err(e) => warn!(session = %id, error = %e, "session renewal failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!(session = %id, "session renewal stopping");
                        return RenewalEnd::Shutdown;
                    }
                }
            }
        })
    }

    /// Destroy the session, releasing every lock it holds. Best effort.
    pub async fn destroy(self) {
        match self.store.destroy_session(&self.id).await {
            Ok(()) => info!(session = %self.id, "host session destroyed"),
            Err(e) => error!(session = %self.id, error = %e, "failed to destroy host session"),
        }
    }
}

/// A random duration in `[0, max)`.
fn jitter(max: Duration) -> Duration {
    let mut buf = [0u8; 8];
    if getrandom::getrandom(&mut buf).is_err() {
        return max / 2;
    }
    let millis = max.as_millis().max(1) as u64;
    Duration::from_millis(u64::from_le_bytes(buf) % millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn fast() -> SessionConfig {
        SessionConfig {
            fast_startup: true,
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn establish_creates_named_session() {
        let store = MemoryStore::new();
        let session = HostSession::establish(Arc::new(store.clone()), "node-a", &fast())
            .await
            .unwrap();

        let sessions = store.node_sessions("node-a").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "Raftainer Host");
        assert_eq!(sessions[0].id, session.id());
    }

    #[tokio::test(start_paused = true)]
    async fn establish_waits_for_stale_session() {
        let store = MemoryStore::new();
        let stale = HostSession::establish(Arc::new(store.clone()), "node-a", &fast())
            .await
            .unwrap();
        let stale_id = stale.id().to_string();

        let expirer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            expirer.expire_session(&stale_id);
        });

        let fresh = HostSession::establish(
            Arc::new(store.clone()),
            "node-a",
            &SessionConfig::default(),
        )
        .await
        .unwrap();
        assert_ne!(fresh.id(), stale.id());
        assert_eq!(store.node_sessions("node-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fast_startup_skips_the_wait() {
        let store = MemoryStore::new();
        HostSession::establish(Arc::new(store.clone()), "node-a", &fast())
            .await
            .unwrap();
        HostSession::establish(Arc::new(store.clone()), "node-a", &fast())
            .await
            .unwrap();
        assert_eq!(store.node_sessions("node-a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn destroy_releases_locks() {
        let store = MemoryStore::new();
        let session = HostSession::establish(Arc::new(store.clone()), "node-a", &fast())
            .await
            .unwrap();
        store.acquire("lock", b"", session.id()).await.unwrap();

        session.destroy().await;
        assert_eq!(store.holder("lock"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_stops_on_shutdown() {
        let store = MemoryStore::new();
        let session = HostSession::establish(Arc::new(store), "node-a", &fast())
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = session.spawn_renewal(rx);

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), RenewalEnd::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_reports_an_expired_session() {
        let store = MemoryStore::new();
        let session = HostSession::establish(Arc::new(store.clone()), "node-a", &fast())
            .await
            .unwrap();
        let (_tx, rx) = watch::channel(false);
        let handle = session.spawn_renewal(rx);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!handle.is_finished());
        store.expire_session(session.id());

        let end = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, RenewalEnd::SessionLost);
    }

    #[test]
    fn jitter_stays_below_bound() {
        for _ in 0..100 {
            assert!(jitter(Duration::from_secs(10)) < Duration::from_secs(10));
        }
    }
}
