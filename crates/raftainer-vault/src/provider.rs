//! Authenticated secret access with a shared, self-expiring token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::backend::{SecretBackend, SecretResponse};
use crate::error::{VaultError, VaultResult};

/// A token is dropped this long before its lease runs out.
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// AppRole credentials used to log in.
#[derive(Clone, Default)]
pub struct AppRole {
    pub role_id: String,
    pub secret_id: String,
}

impl std::fmt::Debug for AppRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRole")
            .field("role_id", &self.role_id)
            .field("secret_id", &"<redacted>")
            .finish()
    }
}

/// Short-lived database credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

struct CachedToken {
    token: String,
    /// `None` for tokens without a lease.
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// Secret provider shared by every sync pass.
///
/// At most one login is in flight: callers that find no valid token queue
/// on the token mutex and reuse whatever the first caller obtained.
pub struct Vault {
    backend: Arc<dyn SecretBackend>,
    approle: AppRole,
    token: Mutex<Option<CachedToken>>,
}

impl Vault {
    pub fn new(backend: Arc<dyn SecretBackend>, approle: AppRole) -> Self {
        Self {
            backend,
            approle,
            token: Mutex::new(None),
        }
    }

    /// A valid token, logging in if the cached one is missing or expired.
    pub async fn login(&self) -> VaultResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            debug!("using cached vault token");
            return Ok(token.token.clone());
        }

        debug!(role_id = %self.approle.role_id, "logging in to vault");
        let login = self
            .backend
            .approle_login(&self.approle.role_id, &self.approle.secret_id)
            .await
            .inspect_err(|e| error!(error = %e, "vault login failed"))?;

        let expires_at = (!login.lease.is_zero())
            .then(|| Instant::now() + login.lease.saturating_sub(TOKEN_EXPIRY_MARGIN));
        info!(lease_secs = login.lease.as_secs(), "vault token issued");
        let token = login.token.clone();
        *cached = Some(CachedToken {
            token: login.token,
            expires_at,
        });
        Ok(token)
    }

    /// Forget the cached token so the next call logs in again.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn read(&self, path: &str) -> VaultResult<Option<SecretResponse>> {
        let token = self.login().await?;
        match self.backend.read(&token, path).await {
            Err(e) if e.is_forbidden() => {
                self.invalidate().await;
                Err(e)
            }
            other => other,
        }
    }

    /// Key/value secrets stored for `pod` at `kv/data/<pod>`.
    ///
    /// A missing path yields an empty map. Non-string values are rendered
    /// as JSON text.
    pub async fn kv_read(&self, pod: &str) -> VaultResult<BTreeMap<String, String>> {
        let path = format!("kv/data/{pod}");
        let secret = match self.read(&path).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                debug!(%path, "no secrets stored for pod");
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                error!(%path, error = %e, "failed to read pod secrets");
                return Err(e);
            }
        };

        let values = match secret.data.get("data") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
            Some(Value::Null) | None => BTreeMap::new(),
            Some(other) => {
                return Err(VaultError::Decode(format!(
                    "{path}: expected an object, got {other}"
                )));
            }
        };
        info!(%path, keys = values.len(), "loaded pod secrets");
        Ok(values)
    }

    /// Fresh credentials for database `role` from `database/creds/<role>`.
    pub async fn get_db_credentials(&self, role: &str) -> VaultResult<DbCredentials> {
        let path = format!("database/creds/{role}");
        debug!(%role, %path, "requesting database credentials");
        let secret = self
            .read(&path)
            .await
            .and_then(|s| {
                s.ok_or_else(|| VaultError::Status {
                    status: 404,
                    path: path.clone(),
                    body: "no such role".to_string(),
                })
            })
            .inspect_err(|e| error!(%role, error = %e, "failed to get database credentials"))?;

        let field = |name: &str| {
            secret
                .data
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| VaultError::MissingField {
                    path: path.clone(),
                    field: name.to_string(),
                })
        };
        let credentials = DbCredentials {
            username: field("username")?,
            password: field("password")?,
            ttl: Duration::from_secs(secret.lease_duration),
        };
        info!(
            %role,
            username = %credentials.username,
            ttl_secs = secret.lease_duration,
            "issued database credentials"
        );
        Ok(credentials)
    }
}
