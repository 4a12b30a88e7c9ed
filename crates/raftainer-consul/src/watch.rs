//! Prefix watch: turns blocking queries into change notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::CoordinationStore;

/// How long one blocking query may wait server-side.
const WAIT: Duration = Duration::from_secs(300);

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Watch everything below `prefix`, calling `on_change` whenever the
/// store's modify index moves. Runs until `shutdown` fires.
///
/// The first query only establishes the baseline index and does not
/// notify. Query failures back off exponentially (1s → 30s).
pub async fn watch_prefix<F>(
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    mut on_change: F,
    mut shutdown: watch::Receiver<bool>,
) where
    F: FnMut(u64) + Send,
{
    let mut baseline: Option<u64> = None;
    let mut backoff = MIN_BACKOFF;
    info!(%prefix, "config watch started");

    loop {
        tokio::select! {
            result = store.wait_for_change(&prefix, baseline.unwrap_or(0), WAIT) => {
                match result {
                    Ok(next) => {
                        backoff = MIN_BACKOFF;
                        match baseline {
                            None => baseline = Some(next),
                            Some(index) if next < index => {
                                // Index went backwards (store snapshot restore): start over.
                                debug!(%prefix, previous = index, next, "watch index reset");
                                baseline = None;
                            }
                            Some(index) if next != index => {
                                debug!(%prefix, index = next, "config changed");
                                on_change(next);
                                baseline = Some(next);
                            }
                            Some(_) => {}
                        }
                    }
                    Err(e) => {
                        warn!(%prefix, error = %e, retry_secs = backoff.as_secs(), "config watch query failed");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown.changed() => break,
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!(%prefix, "config watch stopped");
}
