//! raftainer-model — domain types shared by every Raftainer crate.
//!
//! Pod definitions are stored as JSON under `raftainer/pods/configs/<name>`
//! in the coordination store. This crate owns their schema, the naming
//! conventions for lock keys, networks, containers, and runtime labels, and
//! the deterministic config hash used for idempotent reconciliation.
//!
//! # Architecture
//!
//! ```text
//! Pod
//!   └── Container (ordered)
//!       ├── environment: name → EnvValue (literal | vault key | db role | secure IP)
//!       ├── ports: ExposedPort (Internal | External)
//!       └── hardware_constraints: GPU count / VRAM
//! ```

pub mod env;
pub mod error;
pub mod hash;
pub mod host;
pub mod naming;
pub mod pod;

pub use env::{CredentialField, EnvValue};
pub use error::{ModelError, ModelResult};
pub use hash::config_hash;
pub use host::HostIdentity;
pub use pod::*;
