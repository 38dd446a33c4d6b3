// Panel node identity and raw counter readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored node as reported by the panel. `id` is the panel's uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Cumulative upload/download bytes for one node at one point in time.
/// Non-decreasing under normal operation; drops when the node or its agent restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub node: Node,
    pub upload: u64,
    pub download: u64,
    pub observed_at: DateTime<Utc>,
}
