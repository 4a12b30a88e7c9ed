//! raftainer-vault — secrets and short-lived database credentials for pods.
//!
//! Containers reference secrets indirectly through their environment
//! (`{"vaultKey": ...}`, `{"vaultDatabaseRole": ..., "field": ...}`); the
//! reconciler resolves those through [`Vault`], which logs in with AppRole
//! credentials and shares one token between concurrent callers.

pub mod backend;
pub mod error;
pub mod memory;
pub mod provider;

pub use backend::{LoginToken, SecretBackend, SecretResponse, VaultHttp};
pub use error::{VaultError, VaultResult};
pub use memory::MemorySecrets;
pub use provider::{AppRole, DbCredentials, TOKEN_EXPIRY_MARGIN, Vault};
