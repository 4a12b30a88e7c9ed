//! raftainer-consul — the coordination store Raftainer hosts race against.
//!
//! Mutual exclusion between hosts is delegated entirely to the store's
//! session-scoped acquire: a write that only succeeds while the key is
//! unheld or already held by the caller's session. Sessions carry a TTL and
//! must be renewed; when a host stops renewing, the store releases all of its
//! locks and other hosts take over.
//!
//! # Architecture
//!
//! ```text
//! CoordinationStore (sessions, KV, acquire/release, blocking watch)
//! ServiceCatalog    (agent services + checks)
//!   ├── ConsulClient  (HTTP API)
//!   └── MemoryStore   (in-process, same semantics)
//!
//! HostSession: create, renew loop, destroy
//! watch_prefix: blocking-query loop emitting change notifications
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod session;
pub mod store;
pub mod types;
pub mod watch;

pub use client::ConsulClient;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use session::{HostSession, RenewalEnd, SessionConfig};
pub use store::{CoordinationStore, ServiceCatalog};
pub use types::*;
pub use watch::watch_prefix;
