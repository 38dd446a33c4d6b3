// Pure summing logic shared by rollup and window queries.
// DB access (samples by range, daily records) stays in the repo submodules.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::models::{DailyRecord, Sample, Usage};

/// Aligns a unix timestamp down to the start of its sampling bucket.
pub fn align_down(ts: i64, interval_secs: i64) -> i64 {
    if interval_secs <= 0 {
        return ts;
    }
    ts.div_euclid(interval_secs) * interval_secs
}

/// Sums samples per node id.
pub fn sum_samples(samples: &[Sample]) -> BTreeMap<String, Usage> {
    let mut out: BTreeMap<String, Usage> = BTreeMap::new();
    for s in samples {
        *out.entry(s.node_id.clone()).or_default() += s.usage;
    }
    out
}

/// Sums daily records per node id.
pub fn sum_daily(records: &[DailyRecord]) -> BTreeMap<String, Usage> {
    let mut out: BTreeMap<String, Usage> = BTreeMap::new();
    for r in records {
        *out.entry(r.node_id.clone()).or_default() += r.usage;
    }
    out
}

/// Archive unit key, e.g. "2026-03".
pub fn month_key(day: NaiveDate) -> String {
    format!("{:04}-{:02}", day.year(), day.month())
}

pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_day_key(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| anyhow::anyhow!("bad day {:?}: {}", s, e))
}
