//! Consul HTTP API implementation of the coordination store traits.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::store::{CoordinationStore, ServiceCatalog};
use crate::types::*;

/// Default per-request timeout; blocking queries extend it by their wait.
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Header carrying the store's modify index on KV reads.
const INDEX_HEADER: &str = "X-Consul-Index";

/// Client for a Consul agent's HTTP API.
#[derive(Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for ConsulClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

impl ConsulClient {
    /// Create a client for the agent at `host:port`.
    pub fn new(host: &str, port: u16) -> StoreResult<Self> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .user_agent("raftainer/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}/v1"),
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .timeout(self.timeout)
    }

    /// Send a request and map non-2xx responses to `StoreError::Status`.
    async fn send(&self, path: &str, req: RequestBuilder) -> StoreResult<Response> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            trace!(%path, %status, "consul request ok");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            path: path.to_string(),
            body,
        })
    }

    /// Like [`send`](Self::send) but maps 404 to `None`.
    async fn send_optional(&self, path: &str, req: RequestBuilder) -> StoreResult<Option<Response>> {
        match self.send(path, req).await {
            Ok(r) => Ok(Some(r)),
            Err(StoreError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// PUT to a KV key and decode the boolean the store answers with.
    async fn put_flag(&self, key: &str, value: &[u8], query: (&str, &str)) -> StoreResult<bool> {
        let path = format!("kv/{key}");
        let req = self
            .request(Method::PUT, &path)
            .query(&[query])
            .body(value.to_vec());
        let body = self.send(&path, req).await?.text().await?;
        parse_bool(&body)
    }
}

fn parse_bool(body: &str) -> StoreResult<bool> {
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(StoreError::Decode(format!("expected boolean, got '{other}'"))),
    }
}

/// Consul answers a lock write under an unknown session with a 500 whose
/// body reads `invalid session "<id>"`.
fn session_error(e: StoreError, session: &str) -> StoreError {
    match e {
        StoreError::Status { status: 500, ref body, .. }
            if body.to_ascii_lowercase().contains("invalid session") =>
        {
            StoreError::SessionNotFound(session.to_string())
        }
        e => e,
    }
}

fn parse_index(response: &Response) -> StoreResult<u64> {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| StoreError::Decode(format!("missing {INDEX_HEADER} header")))
}

#[async_trait]
impl CoordinationStore for ConsulClient {
    async fn create_session(&self, request: &SessionRequest) -> StoreResult<String> {
        let path = "session/create";
        let body = serde_json::json!({
            "Name": request.name,
            "Node": request.node,
            "TTL": duration_str(request.ttl),
            "LockDelay": duration_str(request.lock_delay),
            "Behavior": "release",
        });
        let req = self.request(Method::PUT, path).json(&body);
        let created: SessionCreated = self.send(path, req).await?.json().await?;
        debug!(session = %created.id, node = %request.node, "consul session created");
        Ok(created.id)
    }

    async fn renew_session(&self, session: &str) -> StoreResult<()> {
        let path = format!("session/renew/{session}");
        let req = self.request(Method::PUT, &path);
        match self.send_optional(&path, req).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::SessionNotFound(session.to_string())),
        }
    }

    async fn destroy_session(&self, session: &str) -> StoreResult<()> {
        let path = format!("session/destroy/{session}");
        let req = self.request(Method::PUT, &path);
        self.send(&path, req).await?;
        Ok(())
    }

    async fn node_sessions(&self, node: &str) -> StoreResult<Vec<SessionInfo>> {
        let path = format!("session/node/{node}");
        let req = self.request(Method::GET, &path);
        let sessions: Option<Vec<SessionInfo>> = self.send(&path, req).await?.json().await?;
        Ok(sessions.unwrap_or_default())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let folder = format!("{}/", prefix.trim_end_matches('/'));
        let path = format!("kv/{folder}");
        let req = self.request(Method::GET, &path).query(&[("keys", "")]);
        let Some(response) = self.send_optional(&path, req).await? else {
            return Ok(Vec::new());
        };
        let mut keys: Vec<String> = response.json().await?;
        keys.retain(|k| k.len() > folder.len() && !k.ends_with('/'));
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = format!("kv/{key}");
        let req = self.request(Method::GET, &path).query(&[("raw", "")]);
        match self.send_optional(&path, req).await? {
            Some(response) => Ok(Some(response.bytes().await?.to_vec())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = format!("kv/{key}");
        let req = self.request(Method::PUT, &path).body(value.to_vec());
        let body = self.send(&path, req).await?.text().await?;
        if parse_bool(&body)? {
            Ok(())
        } else {
            Err(StoreError::Decode(format!("write to {key} was rejected")))
        }
    }

    async fn acquire(&self, key: &str, value: &[u8], session: &str) -> StoreResult<bool> {
        self.put_flag(key, value, ("acquire", session))
            .await
            .map_err(|e| session_error(e, session))
    }

    async fn release(&self, key: &str, value: &[u8], session: &str) -> StoreResult<bool> {
        self.put_flag(key, value, ("release", session))
            .await
            .map_err(|e| session_error(e, session))
    }

    async fn wait_for_change(&self, prefix: &str, index: u64, wait: Duration) -> StoreResult<u64> {
        let path = format!("kv/{prefix}");
        let req = self
            .request(Method::GET, &path)
            .query(&[
                ("recurse", String::new()),
                ("index", index.to_string()),
                ("wait", duration_str(wait)),
            ])
            .timeout(self.timeout + wait);
        // A missing prefix answers 404 but still carries the index.
        let response = match req.send().await? {
            r if r.status().is_success() || r.status() == StatusCode::NOT_FOUND => r,
            r => {
                let status = r.status().as_u16();
                let body = r.text().await.unwrap_or_default();
                return Err(StoreError::Status { status, path, body });
            }
        };
        parse_index(&response)
    }
}

#[async_trait]
impl ServiceCatalog for ConsulClient {
    async fn register_service(&self, registration: &ServiceRegistration) -> StoreResult<()> {
        let path = "agent/service/register";
        let req = self.request(Method::PUT, path).json(registration);
        self.send(path, req).await?;
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> StoreResult<()> {
        let path = format!("agent/service/deregister/{service_id}");
        let req = self.request(Method::PUT, &path);
        self.send(&path, req).await?;
        Ok(())
    }

    async fn services(&self) -> StoreResult<Vec<RegisteredService>> {
        let path = "agent/services";
        let req = self.request(Method::GET, path);
        let services: HashMap<String, RegisteredService> =
            self.send(path, req).await?.json().await?;
        let mut services: Vec<_> = services.into_values().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn update_check(
        &self,
        check_id: &str,
        status: CheckStatus,
        note: Option<&str>,
    ) -> StoreResult<()> {
        let path = format!("agent/check/{}/{check_id}", status.as_str());
        let mut req = self.request(Method::PUT, &path);
        if let Some(note) = note {
            req = req.query(&[("note", note)]);
        }
        self.send(&path, req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_booleans() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("false\n").unwrap());
        assert!(matches!(parse_bool("maybe"), Err(StoreError::Decode(_))));
    }

    #[test]
    fn invalid_session_writes_map_to_session_not_found() {
        let status = |status, body: &str| StoreError::Status {
            status,
            path: "kv/raftainer/pods/locks/web/0.lock".to_string(),
            body: body.to_string(),
        };
        assert!(matches!(
            session_error(status(500, "invalid session \"abc\""), "abc"),
            StoreError::SessionNotFound(id) if id == "abc"
        ));
        assert!(matches!(
            session_error(status(500, "rpc error"), "abc"),
            StoreError::Status { status: 500, .. }
        ));
        assert!(matches!(
            session_error(status(403, "Permission denied"), "abc"),
            StoreError::Status { status: 403, .. }
        ));
    }

    #[test]
    fn client_targets_v1_api() {
        let client = ConsulClient::new("consul.service.consul", 8500).unwrap();
        assert_eq!(client.base_url, "http://consul.service.consul:8500/v1");
    }

    #[tokio::test]
    async fn unreachable_agent_is_a_transport_error() {
        let client = ConsulClient::new("127.0.0.1", 1).unwrap();
        let err = client.keys("raftainer/pods/configs").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }
}
