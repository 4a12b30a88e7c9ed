//! Environment resolution for one pod launch.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;

use raftainer_model::{Container, CredentialField, EnvValue};
use raftainer_vault::{DbCredentials, Vault};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Resolves container environments for a single pod.
///
/// The pod's static secrets are read at most once, and each database role
/// is issued credentials at most once, however many containers use them.
pub(crate) struct EnvResolver<'a> {
    vault: &'a Vault,
    pod: &'a str,
    secure_ip: IpAddr,
    secrets: Option<BTreeMap<String, String>>,
    credentials: HashMap<String, DbCredentials>,
}

/// A container's resolved environment.
#[derive(Debug, Default)]
pub(crate) struct ResolvedEnv {
    /// `KEY=value` pairs.
    pub vars: Vec<String>,
    /// Shortest TTL among the database credentials the container received.
    pub credential_ttl: Option<Duration>,
}

impl<'a> EnvResolver<'a> {
    pub fn new(vault: &'a Vault, pod: &'a str, secure_ip: IpAddr) -> Self {
        Self {
            vault,
            pod,
            secure_ip,
            secrets: None,
            credentials: HashMap::new(),
        }
    }

    async fn secret(&mut self, key: &str) -> SchedulerResult<String> {
        if self.secrets.is_none() {
            self.secrets = Some(self.vault.kv_read(self.pod).await?);
        }
        self.secrets
            .as_ref()
            .and_then(|s| s.get(key))
            .cloned()
            .ok_or_else(|| SchedulerError::MissingSecret {
                pod: self.pod.to_string(),
                key: key.to_string(),
            })
    }

    async fn credentials(&mut self, role: &str) -> SchedulerResult<&DbCredentials> {
        if !self.credentials.contains_key(role) {
            let issued = self.vault.get_db_credentials(role).await?;
            debug!(pod = %self.pod, %role, ttl_secs = issued.ttl.as_secs(), "issued credentials for pod");
            self.credentials.insert(role.to_string(), issued);
        }
        self.credentials
            .get(role)
            .ok_or_else(|| SchedulerError::MissingSecret {
                pod: self.pod.to_string(),
                key: role.to_string(),
            })
    }

    /// Resolve every variable of `container`.
    pub async fn resolve(&mut self, container: &Container) -> SchedulerResult<ResolvedEnv> {
        let mut resolved = ResolvedEnv::default();
        for (name, value) in &container.environment {
            let value = match value {
                EnvValue::Literal(s) => s.clone(),
                EnvValue::VaultKey { key } => self.secret(key).await?,
                EnvValue::VaultDatabaseRole { role, field } => {
                    let creds = self.credentials(role).await?;
                    let ttl = creds.ttl;
                    let value = match field {
                        CredentialField::Username => creds.username.clone(),
                        CredentialField::Password => creds.password.clone(),
                    };
                    resolved.credential_ttl =
                        Some(resolved.credential_ttl.map_or(ttl, |t| t.min(ttl)));
                    value
                }
                EnvValue::HostSecureIp { enabled: true } => self.secure_ip.to_string(),
                EnvValue::HostSecureIp { enabled: false } => continue,
            };
            resolved.vars.push(format!("{name}={value}"));
        }
        Ok(resolved)
    }
}
