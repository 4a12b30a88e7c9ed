//! Drives sync passes from timer ticks and config changes.
//!
//! All triggers feed one single-slot queue consumed by one task, so passes
//! never overlap and any number of triggers arriving during a pass collapse
//! into a single follow-up pass.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sync::{SyncEngine, SyncState};

/// Why a pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Timer,
    ConfigChange,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Startup => "startup",
            Trigger::Timer => "timer",
            Trigger::ConfigChange => "config-change",
        })
    }
}

/// Cloneable handle for requesting passes.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<Trigger>,
}

impl SyncTrigger {
    /// Queue a pass. Returns `false` when a pass is already queued (this
    /// request merges into it) or the runner has stopped.
    pub fn request(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%trigger, "pass already queued");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Why [`SyncRunner::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    Shutdown,
    /// This many passes in a row failed; the host should restart.
    TooManyFailures(u32),
    /// The store dropped the host session; the host should restart.
    SessionLost,
}

pub struct SyncRunner {
    engine: SyncEngine,
    state: SyncState,
    session: String,
    max_failed_passes: u32,
    requests: mpsc::Receiver<Trigger>,
}

impl SyncRunner {
    /// `max_failed_passes = 0` disables the failure exit.
    pub fn new(engine: SyncEngine, session: impl Into<String>, max_failed_passes: u32) -> (Self, SyncTrigger) {
        let (tx, requests) = mpsc::channel(1);
        let state = SyncState::new(engine.config());
        let runner = Self {
            engine,
            state,
            session: session.into(),
            max_failed_passes,
            requests,
        };
        (runner, SyncTrigger { tx })
    }

    /// Run queued passes one at a time until `shutdown` fires, too many
    /// consecutive passes fail, or a pass finds the session gone. A pass in
    /// progress always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunnerExit {
        let mut consecutive_failures = 0u32;
        info!(session = %self.session, "sync runner started");

        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                trigger = self.requests.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            debug!(%trigger, "sync pass requested");
            match self.engine.sync_pods(&self.session, &mut self.state).await {
                Ok(_) => consecutive_failures = 0,
                Err(e) if e.is_session_lost() => {
                    error!(%trigger, session = %self.session, "host session lost, stopping sync runner");
                    return RunnerExit::SessionLost;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(%trigger, error = %e, consecutive_failures, "sync pass failed");
                    if self.max_failed_passes > 0 && consecutive_failures >= self.max_failed_passes {
                        warn!(consecutive_failures, "giving up after repeated sync failures");
                        return RunnerExit::TooManyFailures(consecutive_failures);
                    }
                }
            }
        }

        info!("sync runner stopped");
        RunnerExit::Shutdown
    }
}

/// Request a pass every `interval` until `shutdown` fires.
pub fn spawn_timer(
    trigger: SyncTrigger,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    trigger.request(Trigger::Timer);
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::constraints::{ConstraintMatcher, StaticInventory};
    use raftainer_consul::{ConsulClient, CoordinationStore, MemoryStore, SessionRequest};
    use raftainer_docker::MemoryRuntime;
    use raftainer_model::HostIdentity;
    use raftainer_vault::{AppRole, MemorySecrets, Vault};
    use std::sync::Arc;

    fn host() -> HostIdentity {
        HostIdentity {
            name: "node-a".to_string(),
            region: "IAD".to_string(),
            secure_ip: None,
            internal_ip: "10.0.0.1".parse().unwrap(),
        }
    }

    fn engine(store: Arc<dyn CoordinationStore>) -> SyncEngine {
        let secrets = Arc::new(MemorySecrets::new(Duration::from_secs(3600)));
        SyncEngine::new(
            store,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRuntime::new()),
            Arc::new(Vault::new(secrets, AppRole::default())),
            ConstraintMatcher::new(Arc::new(StaticInventory::default())),
            host(),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn queued_triggers_collapse_into_one_pass() {
        let store = MemoryStore::new();
        store
            .put(
                "raftainer/pods/configs/web",
                br#"{"name":"web","maxInstances":1,"containers":[]}"#,
            )
            .await
            .unwrap();
        let session = store
            .create_session(&SessionRequest {
                name: "Raftainer Host".to_string(),
                node: "node-a".to_string(),
                ttl: Duration::from_secs(90),
                lock_delay: Duration::from_secs(10),
            })
            .await
            .unwrap();

        let (runner, trigger) = SyncRunner::new(engine(Arc::new(store.clone())), session, 0);
        assert!(trigger.request(Trigger::Startup));
        assert!(!trigger.request(Trigger::Timer));
        assert!(!trigger.request(Trigger::ConfigChange));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;

        // One pass, one acquire for the single slot.
        assert_eq!(store.acquire_calls(), 1);

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), RunnerExit::Shutdown);
        assert!(!trigger.request(Trigger::Timer));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_stop_the_runner() {
        // Nothing listens on port 1, so every pass fails reading desired state.
        let store = Arc::new(ConsulClient::new("127.0.0.1", 1).unwrap());
        let (runner, trigger) = SyncRunner::new(engine(store), "session", 3);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let timer = spawn_timer(trigger.clone(), Duration::from_secs(10), shutdown_rx.clone());
        trigger.request(Trigger::Startup);

        let exit = runner.run(shutdown_rx).await;
        assert_eq!(exit, RunnerExit::TooManyFailures(3));
        timer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_stops_the_runner() {
        let store = MemoryStore::new();
        store
            .put(
                "raftainer/pods/configs/web",
                br#"{"name":"web","maxInstances":1,"containers":[]}"#,
            )
            .await
            .unwrap();
        let session = store
            .create_session(&SessionRequest {
                name: "Raftainer Host".to_string(),
                node: "node-a".to_string(),
                ttl: Duration::from_secs(90),
                lock_delay: Duration::from_secs(10),
            })
            .await
            .unwrap();

        let (runner, trigger) = SyncRunner::new(engine(Arc::new(store.clone())), session.clone(), 3);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let timer = spawn_timer(trigger.clone(), Duration::from_secs(10), shutdown_rx.clone());
        trigger.request(Trigger::Startup);
        let handle = tokio::spawn(runner.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            store.holder("raftainer/pods/locks/web/0.lock").as_deref(),
            Some(session.as_str())
        );

        store.expire_session(&session);
        let exit = tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, RunnerExit::SessionLost);
        timer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_requests_passes_until_shutdown() {
        let (tx, mut rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timer = spawn_timer(SyncTrigger { tx }, Duration::from_secs(10), shutdown_rx);

        assert_eq!(rx.recv().await, Some(Trigger::Timer));
        assert_eq!(rx.recv().await, Some(Trigger::Timer));
        shutdown_tx.send(true).unwrap();
        timer.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
