use std::time::Duration;

/// Tunables of the scheduling core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum lock attempts in flight during one pass.
    pub lock_concurrency: usize,
    /// How long a pod that failed to launch is skipped.
    pub failure_ttl: Duration,
    /// TTL of each pod's heartbeat check; must exceed the sync interval.
    pub check_ttl: Duration,
    /// Containers whose database credentials expire within this window
    /// are recreated with fresh ones.
    pub credential_rotation_margin: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_concurrency: 5,
            failure_ttl: Duration::from_secs(5 * 60),
            check_ttl: Duration::from_secs(100),
            credential_rotation_margin: Duration::from_secs(60),
        }
    }
}
