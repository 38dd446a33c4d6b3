// One poll cycle: list nodes, read counters concurrently, then feed the tracker
// sequentially under the store's write lock and commit the whole cycle at once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::history_repo::{HistoryRepo, NodeUpdate};
use crate::models::{Baseline, CounterSnapshot, Usage};
use crate::panel::CounterSource;
use crate::reader::{ReaderConfig, SkippedNode, read_counters};
use crate::tracker::BaselineTracker;

const LAST_SKIPPED_KEY: &str = "poll.last_skipped";

/// What one poll (or bootstrap) cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub listed: usize,
    pub observed: usize,
    /// Nodes seen for the first time; baseline only.
    pub first_seen: usize,
    pub resets: usize,
    /// Readings not newer than the stored baseline (another cycle got there first).
    pub stale: usize,
    pub skipped: Vec<SkippedNode>,
    pub total: Usage,
}

pub struct Collector<S> {
    source: Arc<S>,
    repo: Arc<HistoryRepo>,
    reader: ReaderConfig,
    /// At most one cycle mutates baselines at a time.
    cycle_lock: Mutex<()>,
}

impl<S: CounterSource> Collector<S> {
    pub fn new(source: Arc<S>, repo: Arc<HistoryRepo>, reader: ReaderConfig) -> Self {
        Self {
            source,
            repo,
            reader,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs one polling cycle at `now`. Fails only when the node list cannot be
    /// fetched or the store rejects the commit; individual nodes are skipped instead.
    #[instrument(skip(self), fields(operation = "collect"))]
    pub async fn collect(&self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let report = self.run_cycle(now, Mode::Collect).await?;
        info!(
            listed = report.listed,
            observed = report.observed,
            first_seen = report.first_seen,
            resets = report.resets,
            stale = report.stale,
            skipped = report.skipped.len(),
            upload = report.total.upload,
            download = report.total.download,
            "poll cycle committed"
        );
        Ok(report)
    }

    /// Anchors a baseline for every visible node at its current reading. No samples
    /// are written, so the next cycle only counts traffic from here on.
    #[instrument(skip(self), fields(operation = "bootstrap"))]
    pub async fn bootstrap(&self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let report = self.run_cycle(now, Mode::Bootstrap).await?;
        info!(
            listed = report.listed,
            anchored = report.observed,
            new_nodes = report.first_seen,
            skipped = report.skipped.len(),
            "bootstrap complete"
        );
        Ok(report)
    }

    async fn run_cycle(&self, now: DateTime<Utc>, mode: Mode) -> anyhow::Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        let nodes = self.source.list_nodes().await?;
        let listed = nodes.len();
        let outcome = read_counters(self.source.as_ref(), nodes, &self.reader, now).await;

        let snapshots = &outcome.snapshots;
        let mut report = self
            .repo
            .apply_cycle(now, |baselines| plan_cycle(baselines, snapshots, mode))
            .await?;
        report.listed = listed;

        self.store_skipped(&outcome.skipped).await?;
        report.skipped = outcome.skipped;
        Ok(report)
    }

    async fn store_skipped(&self, skipped: &[SkippedNode]) -> anyhow::Result<()> {
        let labels: Vec<String> = skipped.iter().map(SkippedNode::label).collect();
        self.repo
            .set_state(LAST_SKIPPED_KEY, &serde_json::to_string(&labels)?)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Collect,
    Bootstrap,
}

/// Turns the cycle's readings into baseline updates against `baselines`.
fn plan_cycle(
    baselines: HashMap<String, Baseline>,
    snapshots: &[CounterSnapshot],
    mode: Mode,
) -> (Vec<NodeUpdate>, CycleReport) {
    let mut tracker = BaselineTracker::new(baselines);
    let mut report = CycleReport::default();
    let mut updates = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let known = tracker.baseline(&snapshot.node.id).map(|b| b.last_observed_at);
        if known.is_some_and(|at| snapshot.observed_at <= at) {
            debug!(node = %snapshot.node.id, "reading is not newer than the baseline; skipped");
            report.stale += 1;
            continue;
        }

        let (delta, reset) = match mode {
            Mode::Collect => {
                let obs = tracker.observe(snapshot);
                if obs.first {
                    report.first_seen += 1;
                }
                if obs.reset {
                    report.resets += 1;
                }
                report.total += obs.delta;
                ((!obs.first).then_some(obs.delta), obs.reset)
            }
            Mode::Bootstrap => {
                if known.is_none() {
                    report.first_seen += 1;
                }
                tracker.anchor(snapshot);
                (None, false)
            }
        };
        let Some(baseline) = tracker.baseline(&snapshot.node.id) else {
            continue;
        };
        report.observed += 1;
        updates.push(NodeUpdate {
            node: snapshot.node.clone(),
            baseline: baseline.clone(),
            delta,
            reset,
        });
    }
    (updates, report)
}

/// "name(reason)" labels of the nodes skipped by the most recent cycle.
pub async fn last_skipped(repo: &HistoryRepo) -> anyhow::Result<Vec<String>> {
    match repo.get_state(LAST_SKIPPED_KEY).await? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}
