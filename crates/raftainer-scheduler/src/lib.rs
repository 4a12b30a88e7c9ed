//! raftainer-scheduler — the per-host scheduling core.
//!
//! Every host runs the same leaderless loop. It races the other hosts for
//! slot locks on the desired pods, runs what it wins, and tears down
//! everything it no longer holds.
//!
//! # Architecture
//!
//! ```text
//! SyncRunner (timer + config watch → single-slot queue)
//!   └── SyncEngine::sync_pods
//!       ├── get_pods            (desired state from the store)
//!       ├── LockCoordinator     (failure cache, constraints, bounded locking)
//!       │     └── try_lock_pod / release_pod
//!       ├── Reconciler          (networks, containers, env + secrets)
//!       ├── ServiceRegistrar    (heartbeat + port services)
//!       └── orphan cleanup      (containers, then networks)
//! ```

pub mod config;
pub mod constraints;
pub mod coordinator;
pub mod desired;
pub mod error;
pub mod locking;
pub mod reconciler;
pub mod registration;
pub mod runner;
pub mod sync;
pub mod ttl_cache;

pub use config::SchedulerConfig;
pub use constraints::{ConstraintMatcher, GpuDevice, GpuInventory, NvidiaSmiInventory, StaticInventory};
pub use coordinator::LockCoordinator;
pub use desired::{get_pods, put_pod};
pub use error::{SchedulerError, SchedulerResult};
pub use locking::{LockHolder, LockRelease, LockedPodEntry, PodLockCache, release_pod, try_lock_pod};
pub use reconciler::{CleanupReport, LaunchedContainer, PodNetwork, Reconciler};
pub use registration::ServiceRegistrar;
pub use runner::{RunnerExit, SyncRunner, SyncTrigger, Trigger, spawn_timer};
pub use sync::{LaunchedPodEntry, SyncEngine, SyncReport, SyncState};
pub use ttl_cache::{FailureCache, TtlCache};
