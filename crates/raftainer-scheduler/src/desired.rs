//! Desired state: pod definitions published in the coordination store.

use raftainer_consul::CoordinationStore;
use raftainer_model::naming::PODS_CONFIG_PREFIX;
use raftainer_model::{ConsulPodEntry, Pod};
use tracing::{debug, warn};

use crate::error::SchedulerResult;

/// Every pod defined under `raftainer/pods/configs/`.
///
/// Entries that vanish between listing and reading, or that do not decode
/// into a valid pod, are logged and skipped. Store failures fail the call.
pub async fn get_pods(store: &dyn CoordinationStore) -> SchedulerResult<Vec<ConsulPodEntry>> {
    let keys = store.keys(PODS_CONFIG_PREFIX).await?;
    debug!(keys = keys.len(), "listed pod definitions");

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(raw) = store.get(&key).await? else {
            debug!(%key, "pod definition removed while listing");
            continue;
        };
        match Pod::from_json(&raw) {
            Ok(pod) => entries.push(ConsulPodEntry { key, pod }),
            Err(e) => warn!(%key, error = %e, "skipping invalid pod definition"),
        }
    }
    Ok(entries)
}

/// Validate `pod` and publish it as desired state.
pub async fn put_pod(store: &dyn CoordinationStore, pod: &Pod) -> SchedulerResult<String> {
    pod.validate()?;
    let key = raftainer_model::naming::config_key(&pod.name);
    let value = serde_json::to_vec_pretty(pod)?;
    store.put(&key, &value).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raftainer_consul::MemoryStore;

    #[tokio::test]
    async fn invalid_entries_are_skipped() {
        let store = MemoryStore::new();
        store
            .put(
                "raftainer/pods/configs/web",
                br#"{"name":"web","maxInstances":1,"containers":[]}"#,
            )
            .await
            .unwrap();
        store
            .put("raftainer/pods/configs/broken", b"{not json")
            .await
            .unwrap();
        store
            .put(
                "raftainer/pods/configs/zero",
                br#"{"name":"zero","maxInstances":0,"containers":[]}"#,
            )
            .await
            .unwrap();
        store
            .put("raftainer/pods/locks/web/0.lock", b"{}")
            .await
            .unwrap();

        let pods = get_pods(&store).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name(), "web");
        assert_eq!(pods[0].key, "raftainer/pods/configs/web");
    }

    #[tokio::test]
    async fn put_pod_round_trips_through_get_pods() {
        let store = MemoryStore::new();
        let pod: Pod = serde_json::from_str(
            r#"{"name":"api","maxInstances":2,"containers":[{"name":"app","image":"api:1"}]}"#,
        )
        .unwrap();
        let key = put_pod(&store, &pod).await.unwrap();
        assert_eq!(key, "raftainer/pods/configs/api");

        let pods = get_pods(&store).await.unwrap();
        assert_eq!(pods[0].pod, pod);
    }

    #[tokio::test]
    async fn put_pod_rejects_invalid_pods() {
        let store = MemoryStore::new();
        let pod: Pod =
            serde_json::from_str(r#"{"name":"a/b","maxInstances":1,"containers":[]}"#).unwrap();
        assert!(put_pod(&store, &pod).await.is_err());
        assert!(store.keys(PODS_CONFIG_PREFIX).await.unwrap().is_empty());
    }
}
