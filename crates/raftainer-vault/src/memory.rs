//! In-process secret backend for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::backend::{LoginToken, SecretBackend, SecretResponse};
use crate::error::{VaultError, VaultResult};

#[derive(Default)]
struct Inner {
    kv: HashMap<String, Value>,
    db_roles: HashMap<String, u64>,
    revoked: Vec<String>,
}

/// Serves KV secrets and numbered database credentials.
///
/// Each login issues a new token (`token-1`, `token-2`, ...). Database
/// reads mint `<role>-user-<n>` / `<role>-pass-<n>`.
pub struct MemorySecrets {
    inner: Mutex<Inner>,
    lease: Duration,
    logins: AtomicU64,
    reads: AtomicU64,
    issued: AtomicU64,
}

impl MemorySecrets {
    pub fn new(lease: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease,
            logins: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            issued: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store KV data for `pod` (served at `kv/data/<pod>`).
    pub fn insert_kv(&self, pod: &str, data: Value) {
        self.lock().kv.insert(pod.to_string(), data);
    }

    /// Enable a database role whose credentials live for `ttl_secs`.
    pub fn insert_db_role(&self, role: &str, ttl_secs: u64) {
        self.lock().db_roles.insert(role.to_string(), ttl_secs);
    }

    /// Reject `token` from now on, as if it had been revoked server-side.
    pub fn revoke(&self, token: &str) {
        self.lock().revoked.push(token.to_string());
    }

    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretBackend for MemorySecrets {
    async fn approle_login(&self, _role_id: &str, _secret_id: &str) -> VaultResult<LoginToken> {
        // Give concurrent callers a chance to pile up behind the login.
        tokio::task::yield_now().await;
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LoginToken {
            token: format!("token-{n}"),
            lease: self.lease,
        })
    }

    async fn read(&self, token: &str, path: &str) -> VaultResult<Option<SecretResponse>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        if inner.revoked.iter().any(|t| t == token) {
            return Err(VaultError::Status {
                status: 403,
                path: path.to_string(),
                body: "permission denied".to_string(),
            });
        }

        if let Some(pod) = path.strip_prefix("kv/data/") {
            return Ok(inner.kv.get(pod).map(|data| SecretResponse {
                lease_duration: 0,
                data: json!({ "data": data, "metadata": { "version": 1 } }),
            }));
        }
        if let Some(role) = path.strip_prefix("database/creds/") {
            let Some(ttl) = inner.db_roles.get(role).copied() else {
                return Ok(None);
            };
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(Some(SecretResponse {
                lease_duration: ttl,
                data: json!({
                    "username": format!("{role}-user-{n}"),
                    "password": format!("{role}-pass-{n}"),
                }),
            }));
        }
        Ok(None)
    }
}
