// Per-node baseline: last cumulative reading plus running accumulated usage

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub node_id: String,
    pub last_upload: u64,
    pub last_download: u64,
    /// Monotonic non-decreasing across counter resets.
    pub accumulated_upload: u64,
    pub accumulated_download: u64,
    pub last_observed_at: DateTime<Utc>,
}
