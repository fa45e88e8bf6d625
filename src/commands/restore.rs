use crate::analysis::checksum::compute_checksum;
use crate::analysis::ordering::dependency_order;
use crate::commands::db;
use crate::commands::export::read_export;
use crate::commands::settings::ShadowConfig;
use crate::error::{RemoteError, ShadowError, ShadowResult};
use crate::models::record::{CollectionSpec, TrackedRecord, TRACKED_COLLECTIONS};
use crate::models::report::{CollectionTally, RestoreAction, RestoreDecision, RestoreReport};
use crate::models::snapshot::{Bundle, Snapshot};
use crate::models::tombstone::Tombstone;
use crate::remote::{with_timeout, RemoteStore};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

pub const TOMBSTONE_COLLECTION: &str = "tombstones";

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub snapshot_id: Option<i64>,
    pub target_user_id: Option<String>,
    pub dry_run: bool,
    /// Keep soft-deleted and tombstoned records.
    pub skip_filter: bool,
}

/// Loads a snapshot and checks its payload against the recorded checksum.
pub fn load_verified_bundle(snapshot: &Snapshot) -> ShadowResult<Bundle> {
    let bundle = snapshot.bundle()?;
    let computed = compute_checksum(&bundle.collections);
    if computed != snapshot.checksum {
        return Err(ShadowError::ChecksumMismatch {
            source_label: format!("snapshot {}", snapshot.id),
            recorded: snapshot.checksum.clone(),
            computed,
        });
    }
    Ok(bundle)
}

pub fn verify_snapshot(conn: &Connection, snapshot_id: Option<i64>) -> ShadowResult<(Snapshot, Bundle)> {
    let snapshot = match snapshot_id {
        Some(id) => db::get_snapshot(conn, id)?
            .ok_or_else(|| ShadowError::SnapshotNotFound(format!("id {id}")))?,
        None => db::latest_good(conn)?
            .ok_or_else(|| ShadowError::SnapshotNotFound("no known-good snapshot".to_string()))?,
    };
    let bundle = load_verified_bundle(&snapshot)?;
    Ok((snapshot, bundle))
}

pub async fn restore_from_store(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    conn: &Connection,
    options: &RestoreOptions,
) -> ShadowResult<RestoreReport> {
    let (snapshot, bundle) = verify_snapshot(conn, options.snapshot_id)?;
    log::info!(
        "restoring snapshot id={} timestamp={} items={}",
        snapshot.id,
        snapshot.timestamp,
        snapshot.item_count
    );
    restore_bundle(config, remote, &bundle, Some(snapshot.id), options).await
}

pub async fn restore_from_export(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    path: &Path,
    options: &RestoreOptions,
) -> ShadowResult<RestoreReport> {
    let bundle = read_export(path)?.into_bundle();
    log::info!("restoring export file {}", path.display());
    restore_bundle(config, remote, &bundle, None, options).await
}

pub async fn restore_bundle(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    bundle: &Bundle,
    snapshot_id: Option<i64>,
    options: &RestoreOptions,
) -> ShadowResult<RestoreReport> {
    let target_user_id = resolve_target_identity(config, remote, bundle, options).await;

    let tombstones = if options.skip_filter {
        log::warn!("filtering disabled: soft-deleted and tombstoned records will be restored");
        HashSet::new()
    } else {
        fetch_tombstones(config, remote).await?
    };

    let mut report = RestoreReport {
        snapshot_id,
        snapshot_timestamp: bundle.meta.timestamp,
        target_user_id: target_user_id.clone(),
        dry_run: options.dry_run,
        filtered: !options.skip_filter,
        tallies: BTreeMap::new(),
        decisions: Vec::new(),
    };

    let mut scope = RestoreScope::new(bundle, &tombstones, options);

    for spec in TRACKED_COLLECTIONS {
        let mut tally = CollectionTally::default();
        let records = bundle.records(spec.name);

        for record in dependency_order(records, spec.self_parent) {
            let outcome = if let Some(skip) = filter_reason(spec, record, &tombstones, options) {
                match skip {
                    RestoreAction::SkippedDeleted => tally.skipped_deleted += 1,
                    _ => tally.skipped_tombstoned += 1,
                }
                decision(spec, record, skip, None)
            } else {
                let row = prepare_row(record, &config.identity.owner_field, target_user_id.as_deref());
                let outcome = if options.dry_run {
                    predict_write(spec, &row, &scope, &mut tally)
                } else {
                    write_record(config, remote, spec, row, &scope, &mut tally).await
                };
                scope.settle(spec.name, &outcome);
                outcome
            };
            report.decisions.push(outcome);
        }

        log::info!(
            "restore {}: restored={} nulled_ref={} deleted={} tombstoned={} failed={}",
            spec.name,
            tally.restored,
            tally.reference_nulled,
            tally.skipped_deleted,
            tally.skipped_tombstoned,
            tally.failed
        );
        report.tallies.insert(spec.name.to_string(), tally);
    }

    Ok(report)
}

/// Ids each collection can receive in this run, and the ones whose write
/// already failed.
struct RestoreScope<'a> {
    restorable: HashMap<&'static str, HashSet<&'a str>>,
    failed: HashMap<&'static str, HashSet<String>>,
}

impl<'a> RestoreScope<'a> {
    fn new(bundle: &'a Bundle, tombstones: &HashSet<Tombstone>, options: &RestoreOptions) -> Self {
        let restorable: HashMap<&'static str, HashSet<&'a str>> = TRACKED_COLLECTIONS
            .iter()
            .map(|spec| {
                let ids: HashSet<&'a str> = bundle
                    .records(spec.name)
                    .iter()
                    .filter(|record| filter_reason(spec, record, tombstones, options).is_none())
                    .map(|record| record.id.as_str())
                    .collect();
                (spec.name, ids)
            })
            .collect();
        Self {
            restorable,
            failed: HashMap::new(),
        }
    }

    fn settle(&mut self, collection: &'static str, outcome: &RestoreDecision) {
        if outcome.action == RestoreAction::Failed {
            self.failed
                .entry(collection)
                .or_default()
                .insert(outcome.id.clone());
        }
    }

    fn can_supply(&self, collection: &str, id: &str) -> bool {
        self.restorable.get(collection).is_some_and(|ids| ids.contains(id))
            && !self.failed.get(collection).is_some_and(|ids| ids.contains(id))
    }

    /// Set references this run cannot satisfy: the target is missing from the
    /// snapshot, filtered out, or its own write failed.
    fn unresolvable_references(&self, spec: &CollectionSpec, row: &TrackedRecord) -> Vec<&'static str> {
        spec.foreign_keys
            .iter()
            .filter(|fk| {
                row.str_field(fk.field)
                    .is_some_and(|target| !self.can_supply(fk.references, target))
            })
            .map(|fk| fk.field)
            .collect()
    }
}

fn decision(
    spec: &CollectionSpec,
    record: &TrackedRecord,
    action: RestoreAction,
    reason: Option<String>,
) -> RestoreDecision {
    RestoreDecision {
        collection: spec.name.to_string(),
        id: record.id.clone(),
        action,
        reason,
    }
}

fn filter_reason(
    spec: &CollectionSpec,
    record: &TrackedRecord,
    tombstones: &HashSet<Tombstone>,
    options: &RestoreOptions,
) -> Option<RestoreAction> {
    if options.skip_filter {
        return None;
    }
    if record.is_deleted {
        return Some(RestoreAction::SkippedDeleted);
    }
    let key = Tombstone {
        entity_type: spec.entity_type.to_string(),
        entity_id: record.id.clone(),
    };
    tombstones
        .contains(&key)
        .then_some(RestoreAction::SkippedTombstoned)
}

fn prepare_row(record: &TrackedRecord, owner_field: &str, target_user_id: Option<&str>) -> TrackedRecord {
    let mut row = record.clone();
    if let Some(owner) = target_user_id {
        row.set_field(owner_field, Value::String(owner.to_string()));
    }
    row
}

async fn upsert_record(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    collection: &str,
    row: &TrackedRecord,
) -> Result<(), RemoteError> {
    let value = serde_json::to_value(row)
        .map_err(|e| RemoteError::new(400, format!("unserializable record: {e}")))?;
    with_timeout(
        &format!("upsert {collection}/{}", row.id),
        config.remote.timeout_ms,
        remote.upsert(collection, &value),
    )
    .await
}

/// References to null out after an FK rejection: the ones the error names
/// plus every one the run cannot supply. With nothing named, every set
/// reference goes.
fn offending_references(
    spec: &CollectionSpec,
    row: &TrackedRecord,
    err: &RemoteError,
    scope: &RestoreScope<'_>,
) -> Vec<&'static str> {
    let set: Vec<&'static str> = spec
        .foreign_keys
        .iter()
        .map(|fk| fk.field)
        .filter(|field| row.str_field(field).is_some())
        .collect();
    let named: Vec<&'static str> = set
        .iter()
        .copied()
        .filter(|field| err.message.contains(field))
        .collect();
    if named.is_empty() {
        return set;
    }

    let unresolvable = scope.unresolvable_references(spec, row);
    set.into_iter()
        .filter(|field| named.contains(field) || unresolvable.contains(field))
        .collect()
}

fn predict_write(
    spec: &CollectionSpec,
    row: &TrackedRecord,
    scope: &RestoreScope<'_>,
    tally: &mut CollectionTally,
) -> RestoreDecision {
    tally.restored += 1;
    let dangling = scope.unresolvable_references(spec, row);
    if dangling.is_empty() {
        return decision(spec, row, RestoreAction::WouldUpsert, None);
    }
    tally.reference_nulled += 1;
    decision(
        spec,
        row,
        RestoreAction::UpsertedWithoutReference,
        Some(format!("would clear {}", dangling.join(", "))),
    )
}

async fn write_record(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    spec: &CollectionSpec,
    mut row: TrackedRecord,
    scope: &RestoreScope<'_>,
    tally: &mut CollectionTally,
) -> RestoreDecision {
    let err = match upsert_record(config, remote, spec.name, &row).await {
        Ok(()) => {
            tally.restored += 1;
            return decision(spec, &row, RestoreAction::Upserted, None);
        }
        Err(err) => err,
    };

    if !err.is_foreign_key_violation() {
        log::error!("restore failed: collection={} id={} reason={err}", spec.name, row.id);
        tally.failed += 1;
        return decision(spec, &row, RestoreAction::Failed, Some(err.to_string()));
    }

    let fields = offending_references(spec, &row, &err, scope);
    for field in &fields {
        row.clear_field(field);
    }
    log::warn!(
        "restore {}/{}: missing reference, retrying without {:?}",
        spec.name,
        row.id,
        fields
    );

    match upsert_record(config, remote, spec.name, &row).await {
        Ok(()) => {
            tally.restored += 1;
            tally.reference_nulled += 1;
            decision(
                spec,
                &row,
                RestoreAction::UpsertedWithoutReference,
                Some(format!("cleared {}", fields.join(", "))),
            )
        }
        Err(retry_err) => {
            log::error!(
                "restore failed after clearing references: collection={} id={} reason={retry_err}",
                spec.name,
                row.id
            );
            tally.failed += 1;
            decision(spec, &row, RestoreAction::Failed, Some(retry_err.to_string()))
        }
    }
}

async fn fetch_tombstones(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
) -> ShadowResult<HashSet<Tombstone>> {
    let mut tombstones = HashSet::new();
    for spec in TRACKED_COLLECTIONS {
        let rows = with_timeout(
            "fetch tombstones",
            config.remote.timeout_ms,
            remote.select_where(TOMBSTONE_COLLECTION, "entity_type", spec.entity_type),
        )
        .await?;
        for row in rows {
            let tombstone: Tombstone = serde_json::from_value(row)?;
            tombstones.insert(tombstone);
        }
    }
    log::debug!("loaded {} tombstones", tombstones.len());
    Ok(tombstones)
}

/// Explicit argument, else the remote's single identity record, else the
/// owner most records in the bundle carry.
async fn resolve_target_identity(
    config: &ShadowConfig,
    remote: &dyn RemoteStore,
    bundle: &Bundle,
    options: &RestoreOptions,
) -> Option<String> {
    if let Some(explicit) = &options.target_user_id {
        return Some(explicit.clone());
    }

    let identity = &config.identity;
    match with_timeout(
        "fetch identities",
        config.remote.timeout_ms,
        remote.fetch_all(&identity.collection),
    )
    .await
    {
        Ok(rows) => {
            let ids: Vec<String> = rows
                .iter()
                .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
                .collect();
            match ids.as_slice() {
                [only] => {
                    log::info!("restore target identity detected from {}: {only}", identity.collection);
                    return Some(only.clone());
                }
                [] => log::warn!("no identity records in {}", identity.collection),
                many => log::warn!(
                    "{} identity records in {}; cannot pick one automatically",
                    many.len(),
                    identity.collection
                ),
            }
        }
        Err(e) => log::warn!("identity lookup failed: {e}"),
    }

    let embedded = dominant_owner(bundle, &identity.owner_field);
    match &embedded {
        Some(owner) => log::warn!(
            "falling back to owner embedded in snapshot ({owner}); that account may no longer exist"
        ),
        None => log::warn!("no owner found in snapshot; records keep their original owner field"),
    }
    embedded
}

fn dominant_owner(bundle: &Bundle, owner_field: &str) -> Option<String> {
    let mut tally: HashMap<&str, usize> = HashMap::new();
    for records in bundle.collections.values() {
        for record in records {
            if let Some(owner) = record.str_field(owner_field) {
                *tally.entry(owner).or_default() += 1;
            }
        }
    }
    tally
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(owner, _)| owner.to_string())
}
