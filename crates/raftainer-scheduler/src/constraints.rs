//! Hardware constraint matching.

use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use raftainer_model::{ConsulPodEntry, GpuConstraint};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// One graphics device on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDevice {
    pub vram_bytes: u64,
}

/// Source of the host's graphics inventory.
#[async_trait]
pub trait GpuInventory: Send + Sync {
    async fn gpus(&self) -> SchedulerResult<Vec<GpuDevice>>;
}

/// Queries NVIDIA devices through `nvidia-smi`.
///
/// A host without the tool has no GPUs.
#[derive(Debug, Clone)]
pub struct NvidiaSmiInventory {
    program: String,
}

impl Default for NvidiaSmiInventory {
    fn default() -> Self {
        Self {
            program: "nvidia-smi".to_string(),
        }
    }
}

impl NvidiaSmiInventory {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

const MIB: u64 = 1024 * 1024;

/// Parse `memory.total` lines (MiB, no units) into devices.
fn parse_nvidia_smi(output: &str) -> SchedulerResult<Vec<GpuDevice>> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            line.parse::<u64>()
                .map(|mib| GpuDevice {
                    vram_bytes: mib * MIB,
                })
                .map_err(|_| SchedulerError::Inventory(format!("unexpected nvidia-smi line '{line}'")))
        })
        .collect()
}

#[async_trait]
impl GpuInventory for NvidiaSmiInventory {
    async fn gpus(&self) -> SchedulerResult<Vec<GpuDevice>> {
        let output = Command::new(&self.program)
            .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
            .output()
            .await;
        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(program = %self.program, "gpu tool not installed, assuming no gpus");
                return Ok(Vec::new());
            }
            Err(e) => return Err(SchedulerError::Inventory(e.to_string())),
        };
        if !output.status.success() {
            return Err(SchedulerError::Inventory(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

/// A fixed inventory, or a fixed failure.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    gpus: Vec<GpuDevice>,
    fail: bool,
}

impl StaticInventory {
    pub fn new(gpus: Vec<GpuDevice>) -> Self {
        Self { gpus, fail: false }
    }

    /// An inventory whose every query fails.
    pub fn failing() -> Self {
        Self {
            gpus: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl GpuInventory for StaticInventory {
    async fn gpus(&self) -> SchedulerResult<Vec<GpuDevice>> {
        if self.fail {
            return Err(SchedulerError::Inventory("inventory unavailable".to_string()));
        }
        Ok(self.gpus.clone())
    }
}

/// Decides whether this host can run a pod.
#[derive(Clone)]
pub struct ConstraintMatcher {
    inventory: Arc<dyn GpuInventory>,
}

impl ConstraintMatcher {
    pub fn new(inventory: Arc<dyn GpuInventory>) -> Self {
        Self { inventory }
    }

    /// Whether the host's hardware satisfies every GPU requirement of the
    /// pod. Inventory failures count as a mismatch.
    pub async fn meets_constraints(&self, entry: &ConsulPodEntry) -> bool {
        let constraints = entry.pod.gpu_constraints();
        if constraints.is_empty() {
            return true;
        }

        let gpus = match self.inventory.gpus().await {
            Ok(gpus) => gpus,
            Err(e) => {
                warn!(pod = %entry.name(), error = %e, "gpu inventory query failed, treating pod as unschedulable");
                return false;
            }
        };

        match constraints.iter().find(|c| !satisfies(&gpus, c)) {
            Some(unmet) => {
                info!(
                    pod = %entry.name(),
                    required_gpus = unmet.gpu_count,
                    required_vram = ?unmet.vram_bytes,
                    available_gpus = gpus.len(),
                    "host does not meet pod constraints"
                );
                false
            }
            None => true,
        }
    }
}

fn satisfies(gpus: &[GpuDevice], constraint: &GpuConstraint) -> bool {
    if (constraint.gpu_count as usize) > gpus.len() {
        return false;
    }
    match constraint.vram_bytes {
        Some(vram) => gpus.iter().any(|g| g.vram_bytes >= vram),
        None => true,
    }
}
