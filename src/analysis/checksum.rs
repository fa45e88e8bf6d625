use crate::models::record::TrackedRecord;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 over the collections only, each sorted by id, so capture time,
/// health fields and fetch order never change the digest.
pub fn compute_checksum(collections: &BTreeMap<String, Vec<TrackedRecord>>) -> String {
    let mut hasher = Sha256::new();
    for (name, records) in collections {
        let mut sorted: Vec<&TrackedRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        for record in sorted {
            // Map keys serialize in sorted order, so the encoding is canonical.
            let encoded = serde_json::to_vec(record).unwrap_or_default();
            hasher.update((encoded.len() as u64).to_le_bytes());
            hasher.update(&encoded);
        }
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> TrackedRecord {
        serde_json::from_value(value).expect("record")
    }

    fn sample() -> BTreeMap<String, Vec<TrackedRecord>> {
        BTreeMap::from([
            (
                "tasks".to_string(),
                vec![
                    record(json!({ "id": "t-1", "title": "a", "priority": 2 })),
                    record(json!({ "id": "t-2", "title": "b" })),
                ],
            ),
            ("projects".to_string(), vec![record(json!({ "id": "p-1" }))]),
        ])
    }

    #[test]
    fn independent_of_record_order() {
        let forward = sample();
        let mut reversed = sample();
        reversed.get_mut("tasks").unwrap().reverse();

        assert_eq!(compute_checksum(&forward), compute_checksum(&reversed));
    }

    #[test]
    fn changes_when_content_changes() {
        let original = sample();
        let mut edited = sample();
        edited.get_mut("tasks").unwrap()[0].set_field("title", json!("changed"));

        assert_ne!(compute_checksum(&original), compute_checksum(&edited));
        assert_eq!(compute_checksum(&original).len(), 64);
    }
}
