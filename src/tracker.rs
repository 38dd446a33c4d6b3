// Baseline tracker: cumulative counters → monotonic per-cycle deltas.
//
// Reset policy: any decrease of a cumulative counter is a reset. The delta for that
// cycle is the new reading itself (counting resumed from zero); the pre-reset tail
// is not reconstructed. Upload and download are judged independently.
// A node absent from some cycles is not a reset: its next reading is diffed against
// the stored baseline and the delta spans the gap.

use std::collections::HashMap;

use tracing::info;

use crate::models::{Baseline, CounterSnapshot, Usage};

/// Result of feeding one snapshot to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub delta: Usage,
    /// At least one counter went backwards.
    pub reset: bool,
    /// No baseline existed; this reading became it (delta is zero).
    pub first: bool,
}

/// Delta of one counter and whether it reset.
pub fn counter_delta(last: u64, now: u64) -> (u64, bool) {
    match now.checked_sub(last) {
        Some(d) => (d, false),
        None => (now, true),
    }
}

pub struct BaselineTracker {
    baselines: HashMap<String, Baseline>,
}

impl BaselineTracker {
    pub fn new(baselines: HashMap<String, Baseline>) -> Self {
        Self { baselines }
    }

    pub fn baseline(&self, node_id: &str) -> Option<&Baseline> {
        self.baselines.get(node_id)
    }

    pub fn observe(&mut self, snapshot: &CounterSnapshot) -> Observation {
        let node_id = &snapshot.node.id;
        let Some(baseline) = self.baselines.get_mut(node_id) else {
            self.baselines
                .insert(node_id.clone(), fresh_baseline(snapshot));
            return Observation {
                delta: Usage::default(),
                reset: false,
                first: true,
            };
        };

        let (upload, upload_reset) = counter_delta(baseline.last_upload, snapshot.upload);
        let (download, download_reset) = counter_delta(baseline.last_download, snapshot.download);
        let reset = upload_reset || download_reset;
        if reset {
            info!(
                node = %node_id,
                name = %snapshot.node.name,
                last_upload = baseline.last_upload,
                last_download = baseline.last_download,
                upload = snapshot.upload,
                download = snapshot.download,
                "counter reset detected; counting resumes from zero"
            );
        }

        baseline.accumulated_upload = baseline.accumulated_upload.saturating_add(upload);
        baseline.accumulated_download = baseline.accumulated_download.saturating_add(download);
        baseline.last_upload = snapshot.upload;
        baseline.last_download = snapshot.download;
        baseline.last_observed_at = snapshot.observed_at;

        Observation {
            delta: Usage::new(upload, download),
            reset,
            first: false,
        }
    }

    /// Anchors the baseline to the current reading without producing a delta.
    /// Accumulated totals of an existing baseline are kept.
    pub fn anchor(&mut self, snapshot: &CounterSnapshot) {
        match self.baselines.get_mut(&snapshot.node.id) {
            Some(baseline) => {
                baseline.last_upload = snapshot.upload;
                baseline.last_download = snapshot.download;
                baseline.last_observed_at = snapshot.observed_at;
            }
            None => {
                self.baselines
                    .insert(snapshot.node.id.clone(), fresh_baseline(snapshot));
            }
        }
    }
}

fn fresh_baseline(snapshot: &CounterSnapshot) -> Baseline {
    Baseline {
        node_id: snapshot.node.id.clone(),
        last_upload: snapshot.upload,
        last_download: snapshot.download,
        accumulated_upload: 0,
        accumulated_download: 0,
        last_observed_at: snapshot.observed_at,
    }
}
