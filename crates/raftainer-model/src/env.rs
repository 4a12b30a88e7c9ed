//! Environment values declared on a container.
//!
//! A value is either a literal string or a reference resolved at launch
//! time. References are plain JSON objects distinguished by their key:
//!
//! ```text
//! "MODE":     "prod"                                           → Literal
//! "API_KEY":  {"vaultKey": "api_key"}                          → VaultKey
//! "DB_PASS":  {"vaultDatabaseRole": "app", "field": "password"} → VaultDatabaseRole
//! "BIND":     {"hostSecureIp": true}                           → HostSecureIp
//! ```

use serde::{Deserialize, Serialize};

/// Which half of a dynamic database credential an env var receives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialField {
    Username,
    Password,
}

/// One environment value before resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvValue {
    /// Passed through unchanged.
    Literal(String),
    /// A key in the pod's static secret document (`kv/data/<pod>`).
    VaultKey {
        #[serde(rename = "vaultKey")]
        key: String,
    },
    /// One field of dynamic credentials issued for a database role.
    VaultDatabaseRole {
        #[serde(rename = "vaultDatabaseRole")]
        role: String,
        field: CredentialField,
    },
    /// The host's secure-interface IP address.
    HostSecureIp {
        #[serde(rename = "hostSecureIp")]
        enabled: bool,
    },
}

impl EnvValue {
    pub fn literal(value: impl Into<String>) -> Self {
        EnvValue::Literal(value.into())
    }

    pub fn vault_key(key: impl Into<String>) -> Self {
        EnvValue::VaultKey { key: key.into() }
    }

    pub fn database_role(role: impl Into<String>, field: CredentialField) -> Self {
        EnvValue::VaultDatabaseRole {
            role: role.into(),
            field,
        }
    }
}
