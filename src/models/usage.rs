// Usage figures: per-interval samples, per-day records, window totals

use std::ops::AddAssign;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Node;

/// Upload/download byte pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub upload: u64,
    pub download: u64,
}

impl Usage {
    pub fn new(upload: u64, download: u64) -> Self {
        Self { upload, download }
    }

    pub fn total(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }

    pub fn is_zero(&self) -> bool {
        self.upload == 0 && self.download == 0
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.upload = self.upload.saturating_add(rhs.upload);
        self.download = self.download.saturating_add(rhs.download);
    }
}

/// One sampling interval's delta for a node. `timestamp` is unix seconds aligned
/// down to the sampling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub node_id: String,
    pub timestamp: i64,
    pub usage: Usage,
}

/// One closed day's summed samples for a node (day in the statistics timezone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRecord {
    pub node_id: String,
    pub day: NaiveDate,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTotals {
    pub node: Node,
    #[serde(flatten)]
    pub usage: Usage,
}
