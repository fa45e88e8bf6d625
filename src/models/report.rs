use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreAction {
    Upserted,
    UpsertedWithoutReference,
    WouldUpsert,
    SkippedDeleted,
    SkippedTombstoned,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreDecision {
    pub collection: String,
    pub id: String,
    pub action: RestoreAction,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTally {
    pub restored: usize,
    pub reference_nulled: usize,
    pub skipped_deleted: usize,
    pub skipped_tombstoned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub snapshot_id: Option<i64>,
    pub snapshot_timestamp: i64,
    pub target_user_id: Option<String>,
    pub dry_run: bool,
    pub filtered: bool,
    pub tallies: BTreeMap<String, CollectionTally>,
    pub decisions: Vec<RestoreDecision>,
}

impl RestoreReport {
    pub fn total_failed(&self) -> usize {
        self.tallies.values().map(|t| t.failed).sum()
    }

    pub fn total_restored(&self) -> usize {
        self.tallies.values().map(|t| t.restored).sum()
    }

    pub fn render_tally(&self) -> String {
        let mut out = String::from("collection  restored  nulled_ref  deleted  tombstoned  failed\n");
        for (name, t) in &self.tallies {
            out.push_str(&format!(
                "{:<10}  {:>8}  {:>10}  {:>7}  {:>10}  {:>6}\n",
                name, t.restored, t.reference_nulled, t.skipped_deleted, t.skipped_tombstoned, t.failed
            ));
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed {
        snapshot_id: i64,
        item_count: i64,
        checksum: String,
        latency_ms: i64,
        counts: BTreeMap<String, usize>,
        pruned: usize,
        guard_overridden: bool,
    },
    Unhealthy {
        latency_ms: i64,
    },
    GuardBlocked {
        reason: String,
        previous_counts: BTreeMap<String, usize>,
        new_counts: BTreeMap<String, usize>,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}
