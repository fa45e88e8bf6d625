use super::record::TrackedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PAYLOAD_SCHEMA_VERSION: i64 = 1;
pub const SNAPSHOT_KIND_FULL: &str = "full";

/// One row of the `snapshots` table. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub timestamp: i64, // ms since epoch
    pub kind: String,
    pub payload: String, // JSON-encoded Bundle
    pub item_count: i64,
    pub checksum: String,
    pub connection_healthy: bool,
    pub latency_ms: i64,
}

impl Snapshot {
    pub fn is_known_good(&self) -> bool {
        self.item_count > 0 && self.connection_healthy
    }

    pub fn bundle(&self) -> serde_json::Result<Bundle> {
        serde_json::from_str(&self.payload)
    }
}

#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub timestamp: i64,
    pub kind: String,
    pub payload: String,
    pub item_count: i64,
    pub checksum: String,
    pub connection_healthy: bool,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    pub timestamp: i64,
    pub schema_version: i64,
    pub connection_healthy: bool,
    pub latency_ms: i64,
    pub counts: BTreeMap<String, usize>,
}

/// Everything captured in one cycle: each tracked collection keyed by name,
/// plus the `meta` block. Collections serialize as top-level keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(flatten)]
    pub collections: BTreeMap<String, Vec<TrackedRecord>>,
    pub meta: BundleMeta,
}

impl Bundle {
    pub fn item_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn records(&self, collection: &str) -> &[TrackedRecord] {
        self.collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    #[serde(flatten)]
    pub collections: BTreeMap<String, Vec<TrackedRecord>>,
    pub meta: BundleMeta,
    pub checksum: String,
}

impl ExportDocument {
    pub fn into_bundle(self) -> Bundle {
        Bundle {
            collections: self.collections,
            meta: self.meta,
        }
    }
}
