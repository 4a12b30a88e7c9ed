//! `raftainerd upload`: publish pod definitions.

use std::path::{Path, PathBuf};

use anyhow::Context;
use raftainer_consul::ConsulClient;
use raftainer_model::Pod;
use raftainer_scheduler::put_pod;
use tracing::info;

use crate::ConsulArgs;

/// Read and validate every file before writing any of them, so one bad
/// definition publishes nothing.
pub async fn upload(consul: &ConsulArgs, files: &[PathBuf]) -> anyhow::Result<()> {
    let pods = files
        .iter()
        .map(PathBuf::as_path)
        .map(read_pod)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let store = ConsulClient::new(&consul.consul_host, consul.consul_port)?;
    for pod in &pods {
        let key = put_pod(&store, pod)
            .await
            .with_context(|| format!("uploading pod {}", pod.name))?;
        info!(pod = %pod.name, %key, max_instances = pod.max_instances, "pod uploaded");
    }
    Ok(())
}

fn read_pod(path: &Path) -> anyhow::Result<Pod> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Pod::from_json(&raw).with_context(|| format!("invalid pod definition in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn valid_definition_is_read() {
        let dir = std::env::temp_dir().join(format!("raftainerd-upload-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write(
            &dir,
            "web.json",
            r#"{"name":"web","maxInstances":2,"containers":[{"name":"nginx","image":"nginx:1.27"}]}"#,
        );

        let pod = read_pod(&path).unwrap();
        assert_eq!(pod.name, "web");
        assert_eq!(pod.max_instances, 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn invalid_definition_names_the_file() {
        let dir = std::env::temp_dir().join(format!("raftainerd-upload-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = write(&dir, "bad.json", r#"{"name":"bad","maxInstances":0,"containers":[]}"#);

        let err = read_pod(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
