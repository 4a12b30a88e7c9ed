//! The secret-store seam and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::error::{VaultError, VaultResult};

/// A token issued by an AppRole login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken {
    pub token: String,
    /// Zero means the token does not expire.
    pub lease: Duration,
}

/// A secret read from a logical path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecretResponse {
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub data: Value,
}

/// Raw access to a Vault-compatible secret store.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn approle_login(&self, role_id: &str, secret_id: &str) -> VaultResult<LoginToken>;

    /// Read a logical path with `token`. `None` when nothing lives there.
    async fn read(&self, token: &str, path: &str) -> VaultResult<Option<SecretResponse>>;
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Vault HTTP API client.
#[derive(Clone)]
pub struct VaultHttp {
    http: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for VaultHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultHttp")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl VaultHttp {
    /// Client for the server at `addr` (e.g. `http://vault.service.consul:8200`).
    pub fn new(addr: &str) -> VaultResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("raftainer/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/v1", addr.trim_end_matches('/')),
        })
    }

    async fn check(path: &str, response: reqwest::Response) -> VaultResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            trace!(%path, %status, "vault request ok");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(VaultError::Status {
            status: status.as_u16(),
            path: path.to_string(),
            body,
        })
    }
}

#[async_trait]
impl SecretBackend for VaultHttp {
    async fn approle_login(&self, role_id: &str, secret_id: &str) -> VaultResult<LoginToken> {
        let path = "auth/approle/login";
        let response = self
            .http
            .request(Method::POST, format!("{}/{path}", self.base_url))
            .json(&serde_json::json!({ "role_id": role_id, "secret_id": secret_id }))
            .send()
            .await?;
        let login: LoginResponse = Self::check(path, response).await?.json().await?;
        Ok(LoginToken {
            token: login.auth.client_token,
            lease: Duration::from_secs(login.auth.lease_duration),
        })
    }

    async fn read(&self, token: &str, path: &str) -> VaultResult<Option<SecretResponse>> {
        let response = self
            .http
            .request(Method::GET, format!("{}/{path}", self.base_url))
            .header("X-Vault-Token", token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let secret = Self::check(path, response).await?.json().await?;
        Ok(Some(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = VaultHttp::new("http://vault.service.consul:8200/").unwrap();
        assert_eq!(client.base_url, "http://vault.service.consul:8200/v1");
    }

    #[test]
    fn secret_response_tolerates_missing_fields() {
        let secret: SecretResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(secret.lease_duration, 0);
        assert!(secret.data.is_null());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = VaultHttp::new("http://127.0.0.1:1").unwrap();
        let err = client.approle_login("role", "secret").await.unwrap_err();
        assert!(matches!(err, VaultError::Transport(_)));
    }
}
