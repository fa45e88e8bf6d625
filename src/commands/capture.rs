use crate::analysis::anomaly;
use crate::analysis::checksum::compute_checksum;
use crate::commands::db;
use crate::commands::export::export_latest;
use crate::commands::health::{self, HealthStatus};
use crate::commands::retention::prune_best_effort;
use crate::commands::settings::ShadowConfig;
use crate::error::{ShadowError, ShadowResult};
use crate::models::record::{TrackedRecord, TRACKED_COLLECTIONS};
use crate::models::report::CycleOutcome;
use crate::models::snapshot::{
    Bundle, BundleMeta, NewSnapshot, PAYLOAD_SCHEMA_VERSION, SNAPSHOT_KIND_FULL,
};
use crate::remote::{with_timeout, RemoteStore};
use fs2::FileExt;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub fn acquire_cycle_lock(lock_path: &Path) -> ShadowResult<File> {
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(ShadowError::Locked(lock_path.display().to_string()));
    }
    Ok(lock_file)
}

/// Pulls every tracked collection. Any single fetch failure fails the
/// whole capture so a partial bundle can never be persisted.
pub async fn capture_bundle(
    remote: &dyn RemoteStore,
    config: &ShadowConfig,
    health: HealthStatus,
    now_ms: i64,
) -> ShadowResult<Bundle> {
    let timeout_ms = config.remote.timeout_ms;
    let mut collections = BTreeMap::new();
    let mut counts = BTreeMap::new();

    for spec in TRACKED_COLLECTIONS {
        let rows = with_timeout(
            &format!("fetch {}", spec.name),
            timeout_ms,
            remote.fetch_all(spec.name),
        )
        .await
        .map_err(|e| {
            log::error!("capture failed: collection={} reason={e}", spec.name);
            e
        })?;

        let mut records = rows
            .into_iter()
            .map(serde_json::from_value::<TrackedRecord>)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        counts.insert(spec.name.to_string(), records.len());
        collections.insert(spec.name.to_string(), records);
    }

    Ok(Bundle {
        collections,
        meta: BundleMeta {
            timestamp: now_ms,
            schema_version: PAYLOAD_SCHEMA_VERSION,
            connection_healthy: health.healthy,
            latency_ms: health.latency_ms,
            counts,
        },
    })
}

fn last_good_counts(conn: &Connection) -> ShadowResult<Option<BTreeMap<String, usize>>> {
    let Some(snapshot) = db::latest_good(conn)? else {
        return Ok(None);
    };
    let bundle = snapshot.bundle()?;
    let counts = bundle
        .collections
        .iter()
        .map(|(name, records)| (name.clone(), records.len()))
        .collect();
    Ok(Some(counts))
}

/// One full pass: probe, capture, guard, persist, export, prune.
pub async fn run_backup_cycle(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    conn: &Connection,
    now_ms: i64,
    force: bool,
) -> ShadowResult<CycleOutcome> {
    let health = health::probe(remote, &config.guard.primary_collection, config.remote.timeout_ms).await;
    if !health.healthy {
        log::warn!("cycle aborted: remote store unhealthy");
        return Ok(CycleOutcome::Unhealthy {
            latency_ms: health.latency_ms,
        });
    }

    let bundle = capture_bundle(remote, config, health, now_ms).await?;

    let previous = last_good_counts(conn)?;
    let verdict = anomaly::evaluate(&bundle.meta.counts, previous.as_ref(), &config.guard);
    let mut guard_overridden = false;
    if verdict.suspicious {
        let reason = verdict.reason.clone().unwrap_or_default();
        if !force {
            log::warn!(
                "cycle aborted by anomaly guard: {reason} previous={:?} new={:?}",
                previous,
                bundle.meta.counts
            );
            return Ok(CycleOutcome::GuardBlocked {
                reason,
                previous_counts: previous.unwrap_or_default(),
                new_counts: bundle.meta.counts,
            });
        }
        log::warn!("anomaly guard overridden by operator: {reason}");
        guard_overridden = true;
    }

    let checksum = compute_checksum(&bundle.collections);
    let item_count = bundle.item_count() as i64;
    let snapshot = db::append_snapshot(
        conn,
        &NewSnapshot {
            timestamp: now_ms,
            kind: SNAPSHOT_KIND_FULL.to_string(),
            payload: serde_json::to_string(&bundle)?,
            item_count,
            checksum: checksum.clone(),
            connection_healthy: health.healthy,
            latency_ms: health.latency_ms,
        },
    )?;
    log::info!(
        "snapshot stored: id={} items={} checksum={}",
        snapshot.id,
        item_count,
        checksum
    );

    export_latest(&config.export_path(), &bundle, &checksum)?;

    let pruned = prune_best_effort(conn, &config.retention, now_ms);

    Ok(CycleOutcome::Completed {
        snapshot_id: snapshot.id,
        item_count,
        checksum,
        latency_ms: health.latency_ms,
        counts: bundle.meta.counts,
        pruned,
        guard_overridden,
    })
}
