use super::{RemoteResult, RemoteStore};
use crate::error::{RemoteError, FK_VIOLATION_CODE};
use crate::models::record::collection_spec;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    fetch_failures: HashMap<String, RemoteError>,
    upsert_failures: HashMap<(String, String), RemoteError>,
    unreachable: bool,
    writes: Vec<(String, String)>,
}

/// In-process remote store. Enforces the declared foreign keys of the
/// tracked collections the way the hosted database does, so restore paths
/// can be exercised without a network.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, collection: &str, row: Value) {
        let id = row_id(&row).unwrap_or_default();
        self.state()
            .tables
            .entry(collection.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.state()
            .tables
            .get(collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, collection: &str, id: &str) -> Option<Value> {
        self.state().tables.get(collection)?.get(id).cloned()
    }

    pub fn clear(&self, collection: &str) {
        self.state().tables.remove(collection);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn fail_fetch(&self, collection: &str, err: RemoteError) {
        self.state().fetch_failures.insert(collection.to_string(), err);
    }

    pub fn fail_upsert(&self, collection: &str, id: &str, err: RemoteError) {
        self.state()
            .upsert_failures
            .insert((collection.to_string(), id.to_string()), err);
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.state().writes.clone()
    }

    fn check_reachable(state: &MemoryState) -> RemoteResult<()> {
        if state.unreachable {
            return Err(RemoteError::transport("connection refused"));
        }
        Ok(())
    }
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn check_foreign_keys(state: &MemoryState, collection: &str, row: &Value) -> RemoteResult<()> {
    let Some(spec) = collection_spec(collection) else {
        return Ok(());
    };
    let own_id = row_id(row);
    for fk in spec.foreign_keys {
        let Some(target_id) = row.get(fk.field).and_then(Value::as_str) else {
            continue;
        };
        // A row may reference itself within the same statement.
        if fk.references == collection && own_id.as_deref() == Some(target_id) {
            continue;
        }
        let present = state
            .tables
            .get(fk.references)
            .is_some_and(|t| t.contains_key(target_id));
        if !present {
            return Err(RemoteError::new(
                409,
                format!(
                    "insert or update on table \"{collection}\" violates foreign key constraint \"{collection}_{}_fkey\" (Key ({})=({target_id}) is not present)",
                    fk.field, fk.field
                ),
            )
            .with_code(FK_VIOLATION_CODE));
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn count(&self, collection: &str) -> RemoteResult<u64> {
        let state = self.state();
        Self::check_reachable(&state)?;
        Ok(state.tables.get(collection).map_or(0, |t| t.len() as u64))
    }

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<Value>> {
        let state = self.state();
        Self::check_reachable(&state)?;
        if let Some(err) = state.fetch_failures.get(collection) {
            return Err(err.clone());
        }
        Ok(state
            .tables
            .get(collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn select_where(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> RemoteResult<Vec<Value>> {
        let rows = self.fetch_all(collection).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.get(field).and_then(Value::as_str) == Some(value))
            .collect())
    }

    async fn upsert(&self, collection: &str, row: &Value) -> RemoteResult<()> {
        let mut state = self.state();
        Self::check_reachable(&state)?;
        let id = row_id(row).ok_or_else(|| RemoteError::new(400, "row is missing an id"))?;
        if let Some(err) = state
            .upsert_failures
            .get(&(collection.to_string(), id.clone()))
        {
            return Err(err.clone());
        }
        check_foreign_keys(&state, collection, row)?;

        state
            .tables
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), row.clone());
        state.writes.push((collection.to_string(), id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_is_keyed_by_id() {
        let remote = MemoryRemote::new();
        remote
            .upsert("projects", &json!({ "id": "p-1", "name": "Home" }))
            .await
            .expect("insert");
        remote
            .upsert("projects", &json!({ "id": "p-1", "name": "Household" }))
            .await
            .expect("update");

        let rows = remote.rows("projects");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Household"));
    }

    #[tokio::test]
    async fn rejects_dangling_reference_with_fk_code() {
        let remote = MemoryRemote::new();
        let err = remote
            .upsert("groups", &json!({ "id": "g-2", "parent_group_id": "g-1" }))
            .await
            .expect_err("dangling parent");

        assert_eq!(err.status, 409);
        assert!(err.is_foreign_key_violation());
        assert!(err.message.contains("parent_group_id"));
        assert!(remote.writes().is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_unreachable(true);
        assert_eq!(remote.count("tasks").await.unwrap_err().status, 0);
        assert!(remote.fetch_all("tasks").await.is_err());
    }
}
