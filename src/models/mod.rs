// Domain models: panel nodes, counters, usage samples and daily totals.

mod baseline;
mod node;
mod usage;

pub use baseline::Baseline;
pub use node::{CounterSnapshot, Node};
pub use usage::{DailyRecord, NodeTotals, Sample, Usage};
