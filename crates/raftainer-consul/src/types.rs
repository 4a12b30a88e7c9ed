//! Wire types for sessions and the service catalog.
//!
//! Field names follow the Consul HTTP API (PascalCase, `ID`, `TTL`, `TCP`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Sessions ──────────────────────────────────────────────────────

/// Parameters for creating a host session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub name: String,
    /// Node the session is bound to.
    pub node: String,
    pub ttl: Duration,
    /// Delay before a released lock may be re-acquired by another session.
    pub lock_delay: Duration,
}

/// A live session as reported by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub node: String,
}

// ── Services ──────────────────────────────────────────────────────

/// A health check attached to a service registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceCheck {
    pub name: String,
    /// Heartbeat check: the host must mark it passing within this window.
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// Active TCP check target (`ip:port`).
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
}

/// A service entry published to the local agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub check: ServiceCheck,
}

impl ServiceRegistration {
    /// Check id the agent assigns to a service's embedded check.
    pub fn check_id(&self) -> String {
        service_check_id(&self.id)
    }
}

/// Check id of the check embedded in service `service_id`.
pub fn service_check_id(service_id: &str) -> String {
    format!("service:{service_id}")
}

/// A service currently known to the local agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RegisteredService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Service")]
    pub name: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl RegisteredService {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|t| t == tag))
    }
}

/// Status a heartbeat check can be set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

/// Format a duration the way the store expects (`"90s"`).
pub fn duration_str(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_uses_api_field_names() {
        let reg = ServiceRegistration {
            id: "raftainer-web-pod".to_string(),
            name: "web".to_string(),
            tags: vec!["raftainer".to_string()],
            address: None,
            port: None,
            check: ServiceCheck {
                name: "raftainer-web-check".to_string(),
                ttl: Some("100s".to_string()),
                ..ServiceCheck::default()
            },
        };
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["ID"], "raftainer-web-pod");
        assert_eq!(json["Check"]["TTL"], "100s");
        assert!(json.get("Address").is_none());
        assert!(json["Check"].get("TCP").is_none());
        assert_eq!(reg.check_id(), "service:raftainer-web-pod");
    }

    #[test]
    fn registered_service_tolerates_null_tags() {
        let svc: RegisteredService =
            serde_json::from_str(r#"{"ID":"x","Service":"x","Tags":null}"#).unwrap();
        assert!(!svc.has_tag("raftainer"));
    }

    #[test]
    fn durations_render_in_seconds() {
        assert_eq!(duration_str(Duration::from_secs(90)), "90s");
    }
}
