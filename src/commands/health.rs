use crate::remote::{with_timeout, RemoteStore};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    /// `-1` when the probe failed.
    pub latency_ms: i64,
}

impl HealthStatus {
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            latency_ms: -1,
        }
    }
}

/// One row-count round trip against `collection`. No retries: the next
/// scheduled cycle is the retry.
pub async fn probe(remote: &dyn RemoteStore, collection: &str, timeout_ms: u64) -> HealthStatus {
    let started = Instant::now();
    match with_timeout("health probe", timeout_ms, remote.count(collection)).await {
        Ok(rows) => {
            let latency_ms = started.elapsed().as_millis() as i64;
            log::debug!("health probe ok: collection={collection} rows={rows} latency_ms={latency_ms}");
            HealthStatus {
                healthy: true,
                latency_ms,
            }
        }
        Err(e) => {
            log::warn!("health probe failed: collection={collection} reason={e}");
            HealthStatus::unhealthy()
        }
    }
}
