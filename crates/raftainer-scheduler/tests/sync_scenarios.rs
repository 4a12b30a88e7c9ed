//! Multi-host sync scenarios.
//!
//! Every host gets its own runtime and local service catalog; they share
//! one in-memory coordination store, exactly as hosts share a Consul
//! cluster. No Docker, Consul, or Vault needed.

use std::sync::Arc;
use std::time::Duration;

use raftainer_consul::{CheckStatus, CoordinationStore, MemoryStore, SessionRequest};
use raftainer_docker::MemoryRuntime;
use raftainer_model::HostIdentity;
use raftainer_scheduler::{
    ConstraintMatcher, LockRelease, SchedulerConfig, StaticInventory, SyncEngine, SyncReport,
    SyncState,
};
use raftainer_vault::{AppRole, MemorySecrets, Vault};

struct TestHost {
    runtime: Arc<MemoryRuntime>,
    catalog: MemoryStore,
    engine: SyncEngine,
    session: String,
    state: SyncState,
}

impl TestHost {
    async fn new(store: &MemoryStore, name: &str, secure_ip: &str) -> Self {
        let runtime = Arc::new(MemoryRuntime::new());
        let catalog = MemoryStore::new();
        let secrets = Arc::new(MemorySecrets::new(Duration::from_secs(3600)));
        let host = HostIdentity {
            name: name.to_string(),
            region: "IAD".to_string(),
            secure_ip: Some(secure_ip.parse().unwrap()),
            internal_ip: "192.168.1.10".parse().unwrap(),
        };
        let session = store
            .create_session(&SessionRequest {
                name: "Raftainer Host".to_string(),
                node: name.to_string(),
                ttl: Duration::from_secs(90),
                lock_delay: Duration::from_secs(10),
            })
            .await
            .unwrap();
        let config = SchedulerConfig::default();
        let engine = SyncEngine::new(
            Arc::new(store.clone()),
            Arc::new(catalog.clone()),
            runtime.clone(),
            Arc::new(Vault::new(secrets, AppRole::default())),
            ConstraintMatcher::new(Arc::new(StaticInventory::default())),
            host,
            config.clone(),
        );
        Self {
            runtime,
            catalog,
            engine,
            session,
            state: SyncState::new(&config),
        }
    }

    async fn sync(&mut self) -> SyncReport {
        self.engine
            .sync_pods(&self.session, &mut self.state)
            .await
            .unwrap()
    }

    fn runs_web(&self) -> bool {
        self.runtime
            .container("web.nginx")
            .is_some_and(|c| c.is_running())
    }
}

async fn publish_web(store: &MemoryStore, max_instances: u32) {
    let pod = format!(
        r#"{{"name":"web","maxInstances":{max_instances},"containers":[{{"name":"nginx","image":"nginx:1.27"}}]}}"#
    );
    store
        .put("raftainer/pods/configs/web", pod.as_bytes())
        .await
        .unwrap();
}

#[tokio::test]
async fn single_instance_pod_runs_on_exactly_one_host() {
    let store = MemoryStore::new();
    publish_web(&store, 1).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;
    let mut b = TestHost::new(&store, "node-b", "10.8.0.2").await;

    let (ra, rb) = tokio::join!(a.sync(), b.sync());
    assert_eq!(ra.locked.len() + rb.locked.len(), 1);

    let (winner, loser) = if a.runs_web() { (&a, &b) } else { (&b, &a) };
    assert!(winner.runs_web());
    assert_eq!(
        winner.catalog.check_status("service:raftainer-web-pod"),
        Some(CheckStatus::Pass)
    );
    assert_eq!(
        store.holder("raftainer/pods/locks/web/0.lock").as_deref(),
        Some(winner.session.as_str())
    );

    assert!(loser.runtime.container_names().is_empty());
    assert!(loser.runtime.network_names().is_empty());
    assert!(loser.catalog.service_ids().is_empty());
}

#[tokio::test]
async fn repeated_passes_keep_the_same_slot_and_container() {
    let store = MemoryStore::new();
    publish_web(&store, 1).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;

    a.sync().await;
    let id = a.runtime.container("web.nginx").unwrap().id;
    let acquires = store.acquire_calls();

    let report = a.sync().await;
    assert_eq!(report.launched, vec!["web".to_string()]);
    assert_eq!(a.runtime.container("web.nginx").unwrap().id, id);
    assert_eq!(a.runtime.creates(), 1);
    // Only the cached slot is tried.
    assert_eq!(store.acquire_calls() - acquires, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_launch_releases_slot_and_backs_off() {
    let store = MemoryStore::new();
    publish_web(&store, 1).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;
    a.runtime.fail_image("nginx:1.27");

    let report = a.sync().await;
    assert!(report.launched.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "web");

    let key = "raftainer/pods/locks/web/0.lock";
    assert!(store.holder(key).is_none());
    let release: LockRelease = serde_json::from_slice(&store.value(key).unwrap()).unwrap();
    assert_eq!(release.error, report.failed[0].1);
    assert_eq!(release.host, "node-a");
    assert!(a.catalog.service_ids().is_empty());
    assert!(a.state.failures.get(&"web".to_string()).is_some());

    let acquires = store.acquire_calls();
    let report = a.sync().await;
    assert!(report.locked.is_empty());
    assert_eq!(store.acquire_calls(), acquires);

    tokio::time::advance(Duration::from_secs(301)).await;
    let report = a.sync().await;
    assert_eq!(report.locked, vec!["web".to_string()]);
}

#[tokio::test]
async fn deleting_a_failed_pod_clears_its_backoff() {
    let store = MemoryStore::new();
    publish_web(&store, 1).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;
    a.runtime.fail_image("nginx:1.27");

    a.sync().await;
    assert_eq!(a.state.failures.len(), 1);

    store.delete_key("raftainer/pods/configs/web");
    let report = a.sync().await;
    assert_eq!(report.desired, 0);
    assert!(a.state.failures.is_empty());
}

#[tokio::test]
async fn container_that_fails_to_start_fails_the_pod_and_frees_its_name() {
    let store = MemoryStore::new();
    publish_web(&store, 1).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;
    a.runtime.fail_start("web.nginx");

    let report = a.sync().await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "web");
    assert!(a.runtime.container("web.nginx").is_none());
    assert!(store.holder("raftainer/pods/locks/web/0.lock").is_none());
    assert!(a.catalog.service_ids().is_empty());
}

#[tokio::test]
async fn slots_move_to_a_surviving_host_when_a_session_expires() {
    let store = MemoryStore::new();
    publish_web(&store, 1).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;
    let mut b = TestHost::new(&store, "node-b", "10.8.0.2").await;

    a.sync().await;
    b.sync().await;
    assert!(a.runs_web());
    assert!(!b.runs_web());

    store.expire_session(&a.session);
    b.sync().await;
    assert!(b.runs_web());
    assert_eq!(
        b.catalog.check_status("service:raftainer-web-pod"),
        Some(CheckStatus::Pass)
    );

    // The expired host cannot lock anything under its old session.
    let err = a
        .engine
        .sync_pods(&a.session, &mut a.state)
        .await
        .unwrap_err();
    assert!(err.is_session_lost());
}

#[tokio::test]
async fn shrinking_max_instances_tears_down_the_extra_replica() {
    let store = MemoryStore::new();
    publish_web(&store, 2).await;
    let mut a = TestHost::new(&store, "node-a", "10.8.0.1").await;
    let mut b = TestHost::new(&store, "node-b", "10.8.0.2").await;

    a.sync().await;
    b.sync().await;
    assert!(a.runs_web());
    assert!(b.runs_web());
    assert_eq!(
        store.holder("raftainer/pods/locks/web/1.lock").as_deref(),
        Some(b.session.as_str())
    );

    publish_web(&store, 1).await;
    let report = b.sync().await;
    assert!(report.locked.is_empty());
    assert!(store.holder("raftainer/pods/locks/web/1.lock").is_none());
    assert!(b.runtime.container_names().is_empty());
    assert!(b.runtime.network_names().is_empty());
    assert!(b.catalog.service_ids().is_empty());

    let report = a.sync().await;
    assert_eq!(report.launched, vec!["web".to_string()]);
}
