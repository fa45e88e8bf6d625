use serde::{Deserialize, Serialize};

/// Remote-owned marker that `(entity_type, entity_id)` was deleted on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tombstone {
    pub entity_type: String,
    pub entity_id: String,
}
