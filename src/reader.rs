// Counter reader: fetches every node's counters with bounded concurrency and a
// per-node deadline. A failing node is skipped for the cycle, never fatal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::{CounterSnapshot, Node};
use crate::panel::CounterSource;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub workers: usize,
    pub timeout: Duration,
}

/// A node that produced no reading this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedNode {
    pub node: Node,
    pub reason: String,
}

impl SkippedNode {
    /// "name(reason)" as shown in reports.
    pub fn label(&self) -> String {
        format!("{}({})", self.node.name, self.reason)
    }
}

#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Sorted by node id.
    pub snapshots: Vec<CounterSnapshot>,
    /// Sorted by node name.
    pub skipped: Vec<SkippedNode>,
}

/// Reads all `nodes`. Every snapshot carries `observed_at`, the cycle's instant.
pub async fn read_counters<S: CounterSource>(
    source: &S,
    nodes: Vec<Node>,
    config: &ReaderConfig,
    observed_at: DateTime<Utc>,
) -> ReadOutcome {
    let workers = config.workers.max(1);
    let results: Vec<(Node, Result<_, FetchError>)> = stream::iter(nodes)
        .map(|node| async move {
            let result = match tokio::time::timeout(config.timeout, source.fetch_counters(&node)).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout),
            };
            (node, result)
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut outcome = ReadOutcome::default();
    for (node, result) in results {
        match result {
            Ok(counters) => outcome.snapshots.push(CounterSnapshot {
                node,
                upload: counters.upload,
                download: counters.download,
                observed_at,
            }),
            Err(e) => {
                warn!(node = %node.id, name = %node.name, error = %e, "counter fetch failed; node skipped this cycle");
                outcome.skipped.push(SkippedNode {
                    node,
                    reason: e.short_reason().to_string(),
                });
            }
        }
    }
    outcome.snapshots.sort_by(|a, b| a.node.id.cmp(&b.node.id));
    outcome
        .skipped
        .sort_by(|a, b| a.node.name.to_lowercase().cmp(&b.node.name.to_lowercase()));
    debug!(
        read = outcome.snapshots.len(),
        skipped = outcome.skipped.len(),
        "counter read complete"
    );
    outcome
}
