//! Collaborator traits for the coordination store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::*;

/// Sessions, key/value access, session-scoped locks, and blocking watches.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create a session and return its id.
    async fn create_session(&self, request: &SessionRequest) -> StoreResult<String>;

    /// Reset a session's TTL. Fails with `SessionNotFound` once it expired.
    async fn renew_session(&self, session: &str) -> StoreResult<()>;

    /// Destroy a session, releasing every lock it holds.
    async fn destroy_session(&self, session: &str) -> StoreResult<()>;

    /// Sessions bound to a node.
    async fn node_sessions(&self, node: &str) -> StoreResult<Vec<SessionInfo>>;

    /// Keys strictly below `prefix` (`prefix/...`), sorted.
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Raw value of a key, `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Unconditional write.
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Write `value` and take the lock on `key` for `session`.
    ///
    /// Returns `false` when another session holds the key.
    async fn acquire(&self, key: &str, value: &[u8], session: &str) -> StoreResult<bool>;

    /// Write `value` and drop `session`'s hold on `key`.
    async fn release(&self, key: &str, value: &[u8], session: &str) -> StoreResult<bool>;

    /// Block until anything below `prefix` changes past `index` or `wait`
    /// elapses; returns the current modify index.
    async fn wait_for_change(&self, prefix: &str, index: u64, wait: Duration) -> StoreResult<u64>;
}

/// The host-local service catalog.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Register (or replace) a service entry with its check.
    async fn register_service(&self, registration: &ServiceRegistration) -> StoreResult<()>;

    async fn deregister_service(&self, service_id: &str) -> StoreResult<()>;

    /// Every service registered with the local agent.
    async fn services(&self) -> StoreResult<Vec<RegisteredService>>;

    /// Set the status of a heartbeat check.
    async fn update_check(
        &self,
        check_id: &str,
        status: CheckStatus,
        note: Option<&str>,
    ) -> StoreResult<()>;
}
