use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of a tracked collection. Only the fields the backup pipeline
/// inspects are typed; everything else rides along in `rest` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_deleted: bool,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or numeric id, got {other}"
        ))),
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl TrackedRecord {
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.rest.get(field).and_then(Value::as_str)
    }

    pub fn set_field(&mut self, field: &str, value: Value) {
        self.rest.insert(field.to_string(), value);
    }

    pub fn clear_field(&mut self, field: &str) {
        if self.rest.contains_key(field) {
            self.rest.insert(field.to_string(), Value::Null);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub references: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub entity_type: &'static str,
    pub foreign_keys: &'static [ForeignKey],
    pub self_parent: Option<&'static str>,
}

impl CollectionSpec {
    pub fn foreign_key(&self, field: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.field == field)
    }
}

/// Tracked collections in restore order: parents before the rows that
/// reference them.
pub const TRACKED_COLLECTIONS: &[CollectionSpec] = &[
    CollectionSpec {
        name: "projects",
        entity_type: "project",
        foreign_keys: &[],
        self_parent: None,
    },
    CollectionSpec {
        name: "groups",
        entity_type: "group",
        foreign_keys: &[
            ForeignKey { field: "project_id", references: "projects" },
            ForeignKey { field: "parent_group_id", references: "groups" },
        ],
        self_parent: Some("parent_group_id"),
    },
    CollectionSpec {
        name: "tasks",
        entity_type: "task",
        foreign_keys: &[
            ForeignKey { field: "project_id", references: "projects" },
            ForeignKey { field: "group_id", references: "groups" },
            ForeignKey { field: "parent_task_id", references: "tasks" },
        ],
        self_parent: Some("parent_task_id"),
    },
];

pub fn collection_spec(name: &str) -> Option<&'static CollectionSpec> {
    TRACKED_COLLECTIONS.iter().find(|spec| spec.name == name)
}
