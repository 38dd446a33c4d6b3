// Top-N by combined traffic, ties broken by node id.

use chrono::{DateTime, Utc};

use crate::models::NodeTotals;
use crate::window::{WindowAggregator, WindowSpec, WindowTotals};

/// Nodes with traffic, highest upload+download first, at most `n`.
pub fn top_n<'a>(totals: impl IntoIterator<Item = &'a NodeTotals>, n: usize) -> Vec<NodeTotals> {
    let mut ranked: Vec<NodeTotals> = totals
        .into_iter()
        .filter(|t| t.usage.total() > 0)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        b.usage
            .total()
            .cmp(&a.usage.total())
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
    ranked.truncate(n);
    ranked
}

/// Aggregates `spec` and ranks it. Returns the window too, for its label.
pub async fn rank(
    aggregator: &WindowAggregator,
    spec: WindowSpec,
    n: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<(WindowTotals, Vec<NodeTotals>)> {
    let window = aggregator.aggregate(spec, now).await?;
    let top = top_n(window.nodes.values(), n);
    Ok((window, top))
}
