// Window aggregation: per-node totals for calendar windows and rolling hours.
// Closed days come from daily records (samples stand in for days never rolled up);
// the open part of a window comes from samples.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, instrument};

use crate::calendar::{
    day_start, days_between, format_day, format_instant, local_date, month_start, next_day,
    prev_day, week_start,
};
use crate::error::CommandError;
use crate::history_repo::HistoryRepo;
use crate::history_repo::aggregation::{align_down, sum_daily, sum_samples};
use crate::models::{Node, NodeTotals, Usage};

/// Longest rolling window accepted, ten years.
pub const MAX_WINDOW_HOURS: u32 = 24 * 365 * 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    Today,
    ThisWeek,
    ThisMonth,
    LastHours(u32),
    /// One day; closed unless it is today.
    Day(NaiveDate),
    /// Inclusive day range.
    Days { from: NaiveDate, to: NaiveDate },
}

impl FromStr for WindowSpec {
    type Err = CommandError;

    /// `today|t`, `week|w`, `month|m`, `Nh`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arg = s.trim().to_lowercase();
        match arg.as_str() {
            "today" | "t" => return Ok(WindowSpec::Today),
            "week" | "w" => return Ok(WindowSpec::ThisWeek),
            "month" | "m" => return Ok(WindowSpec::ThisMonth),
            _ => {}
        }
        let digits = arg
            .strip_suffix('h')
            .map(str::trim_end)
            .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| CommandError::BadWindow(s.trim().to_string()))?;
        let hours: u32 = digits
            .parse()
            .map_err(|_| CommandError::BadWindow(s.trim().to_string()))?;
        if hours == 0 {
            return Err(CommandError::ZeroHours);
        }
        if hours > MAX_WINDOW_HOURS {
            return Err(CommandError::TooManyHours {
                max: MAX_WINDOW_HOURS,
            });
        }
        Ok(WindowSpec::LastHours(hours))
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Today => write!(f, "today"),
            WindowSpec::ThisWeek => write!(f, "this week"),
            WindowSpec::ThisMonth => write!(f, "this month"),
            WindowSpec::LastHours(h) => write!(f, "last {}h", h),
            WindowSpec::Day(d) => write!(f, "{}", format_day(*d)),
            WindowSpec::Days { from, to } => write!(f, "{} → {}", format_day(*from), format_day(*to)),
        }
    }
}

/// Totals for every known node over one window.
#[derive(Debug, Clone)]
pub struct WindowTotals {
    pub spec: WindowSpec,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
    /// The window reaches the present (includes the current partial day or hour).
    pub live: bool,
    /// Keyed by node id.
    pub nodes: BTreeMap<String, NodeTotals>,
}

impl WindowTotals {
    pub fn total(&self) -> Usage {
        let mut sum = Usage::default();
        for n in self.nodes.values() {
            sum += n.usage;
        }
        sum
    }
}

/// Which parts of the store a window reads.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Plan {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    closed: Option<(NaiveDate, NaiveDate)>,
    /// Sample range [since, until) in unix seconds.
    tail: Option<(i64, i64)>,
    live: bool,
}

pub struct WindowAggregator {
    repo: Arc<HistoryRepo>,
}

impl WindowAggregator {
    pub fn new(repo: Arc<HistoryRepo>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &HistoryRepo {
        &self.repo
    }

    fn plan(&self, spec: WindowSpec, now: DateTime<Utc>) -> Plan {
        let settings = self.repo.settings();
        let tz = settings.timezone;
        let today = local_date(tz, now);
        // End of the bucket holding `now`, so the current interval counts.
        let live_end = align_down(now.timestamp(), settings.sample_interval_secs)
            + settings.sample_interval_secs;

        let (from, to) = match spec {
            WindowSpec::LastHours(h) => {
                let hours = h.min(MAX_WINDOW_HOURS) as i64;
                let start = now - Duration::hours(hours);
                return Plan {
                    start,
                    end: now,
                    closed: None,
                    tail: Some((start.timestamp(), live_end)),
                    live: true,
                };
            }
            WindowSpec::Today => (today, today),
            WindowSpec::ThisWeek => (week_start(today), today),
            WindowSpec::ThisMonth => (month_start(today), today),
            WindowSpec::Day(d) => (d, d),
            WindowSpec::Days { from, to } => (from, to),
        };

        let start = day_start(tz, from);
        if from > today || from > to {
            return Plan {
                start,
                end: start,
                closed: None,
                tail: None,
                live: false,
            };
        }
        if to < today {
            return Plan {
                start,
                end: day_start(tz, next_day(to)),
                closed: Some((from, to)),
                tail: None,
                live: false,
            };
        }
        let closed = (from < today).then(|| (from, prev_day(today)));
        Plan {
            start,
            end: now,
            closed,
            tail: Some((day_start(tz, today).timestamp(), live_end)),
            live: true,
        }
    }

    /// Per-node totals for `spec` as of `now`. Every known node is present, zero if idle.
    #[instrument(skip(self), fields(operation = "aggregate", window = %spec))]
    pub async fn aggregate(&self, spec: WindowSpec, now: DateTime<Utc>) -> anyhow::Result<WindowTotals> {
        let plan = self.plan(spec, now);
        let mut sums: BTreeMap<String, Usage> = BTreeMap::new();

        if let Some((from, to)) = plan.closed {
            let records = self.repo.query_daily(None, from, to).await?;
            let covered: BTreeSet<NaiveDate> = records.iter().map(|r| r.day).collect();
            merge(&mut sums, sum_daily(&records));

            let tz = self.repo.settings().timezone;
            let cutoff = self.repo.settings().sample_cutoff(now);
            for day in days_between(from, to).filter(|d| !covered.contains(d)) {
                let until = day_start(tz, next_day(day)).timestamp();
                if until <= cutoff {
                    continue;
                }
                let since = day_start(tz, day).timestamp();
                let samples = self.repo.query_samples(None, since, until).await?;
                if !samples.is_empty() {
                    debug!(day = %day, "no daily records; summing samples");
                }
                merge(&mut sums, sum_samples(&samples));
            }
        }

        if let Some((since, until)) = plan.tail {
            let samples = self.repo.query_samples(None, since, until).await?;
            merge(&mut sums, sum_samples(&samples));
        }

        let mut nodes: BTreeMap<String, NodeTotals> = self
            .repo
            .known_nodes()
            .await?
            .into_iter()
            .map(|node| {
                (
                    node.id.clone(),
                    NodeTotals {
                        node,
                        usage: Usage::default(),
                    },
                )
            })
            .collect();
        for (id, usage) in sums {
            nodes
                .entry(id.clone())
                .or_insert_with(|| NodeTotals {
                    node: Node::new(id.clone(), id),
                    usage: Usage::default(),
                })
                .usage += usage;
        }

        Ok(WindowTotals {
            spec,
            start: plan.start,
            end: plan.end,
            label: self.label(spec, &plan),
            live: plan.live,
            nodes,
        })
    }

    fn label(&self, spec: WindowSpec, plan: &Plan) -> String {
        let tz = self.repo.settings().timezone;
        match (spec, plan.live) {
            (WindowSpec::Day(d), false) => format_day(d),
            (_, false) => {
                let last = prev_day(local_date(tz, plan.end));
                if last <= local_date(tz, plan.start) {
                    format_day(local_date(tz, plan.start))
                } else {
                    format!("{} → {}", format_day(local_date(tz, plan.start)), format_day(last))
                }
            }
            (_, true) => format!(
                "{} → {}",
                format_instant(tz, plan.start),
                format_instant(tz, plan.end)
            ),
        }
    }
}

fn merge(into: &mut BTreeMap<String, Usage>, from: BTreeMap<String, Usage>) {
    for (id, usage) in from {
        *into.entry(id).or_default() += usage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_arguments() {
        assert_eq!("today".parse::<WindowSpec>(), Ok(WindowSpec::Today));
        assert_eq!("T".parse::<WindowSpec>(), Ok(WindowSpec::Today));
        assert_eq!("w".parse::<WindowSpec>(), Ok(WindowSpec::ThisWeek));
        assert_eq!("Month".parse::<WindowSpec>(), Ok(WindowSpec::ThisMonth));
        assert_eq!("6h".parse::<WindowSpec>(), Ok(WindowSpec::LastHours(6)));
        assert_eq!("168H".parse::<WindowSpec>(), Ok(WindowSpec::LastHours(168)));
    }

    #[test]
    fn rejects_bad_windows() {
        assert_eq!("0h".parse::<WindowSpec>(), Err(CommandError::ZeroHours));
        assert_eq!(
            "h".parse::<WindowSpec>(),
            Err(CommandError::BadWindow("h".into()))
        );
        assert_eq!(
            "yesterday".parse::<WindowSpec>(),
            Err(CommandError::BadWindow("yesterday".into()))
        );
        assert_eq!(
            "-3h".parse::<WindowSpec>(),
            Err(CommandError::BadWindow("-3h".into()))
        );
        assert!("99999999999h".parse::<WindowSpec>().is_err());
    }

    #[test]
    fn caps_rolling_hours() {
        assert_eq!(
            "87600h".parse::<WindowSpec>(),
            Ok(WindowSpec::LastHours(MAX_WINDOW_HOURS))
        );
        assert_eq!(
            "87601h".parse::<WindowSpec>(),
            Err(CommandError::TooManyHours {
                max: MAX_WINDOW_HOURS
            })
        );
        assert_eq!(
            "4294967295h".parse::<WindowSpec>(),
            Err(CommandError::TooManyHours {
                max: MAX_WINDOW_HOURS
            })
        );
    }
}
