//! raftainer-docker — the container runtime seam.
//!
//! The reconciler only talks to [`ContainerRuntime`]; [`DockerRuntime`]
//! drives a real engine and [`MemoryRuntime`] keeps everything in memory
//! for tests.

pub mod docker;
pub mod error;
pub mod memory;
pub mod runtime;
pub mod types;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::MemoryRuntime;
pub use runtime::ContainerRuntime;
pub use types::*;
