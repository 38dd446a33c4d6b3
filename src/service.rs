// Report/query facade: the entry points the CLI, the chat bot, the scheduler and
// the poll worker call.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::calendar::{
    days_between, format_day, format_instant, local_date, prev_day, previous_month, previous_week,
};
use crate::collector::{Collector, CycleReport, last_skipped};
use crate::commands::{self, Command};
use crate::history_repo::{ArchiveSummary, HistoryRepo};
use crate::models::Node;
use crate::panel::CounterSource;
use crate::ranking::{rank, top_n};
use crate::reader::ReaderConfig;
use crate::report::{
    ReportNotes, command_error_reply, format_failure_alert, format_top, format_usage_report,
    help_text, internal_error_reply,
};
use crate::telegram::Messenger;
use crate::window::{WindowAggregator, WindowSpec, WindowTotals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Daily,
    Weekly,
    Monthly,
}

impl ReportKind {
    fn title(self) -> &'static str {
        match self {
            ReportKind::Daily => "Daily traffic report",
            ReportKind::Weekly => "Weekly traffic report",
            ReportKind::Monthly => "Monthly traffic report",
        }
    }

    fn state_key(self) -> String {
        format!("report.{}.last", self)
    }

    /// Closed period the report covers when run on `today`.
    pub fn period(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            ReportKind::Daily => {
                let y = prev_day(today);
                (y, y)
            }
            ReportKind::Weekly => previous_week(today),
            ReportKind::Monthly => previous_month(today),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportKind::Daily => "daily",
            ReportKind::Weekly => "weekly",
            ReportKind::Monthly => "monthly",
        })
    }
}

/// What a report invocation did.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub kind: ReportKind,
    pub period: String,
    pub text: String,
    pub delivered: bool,
    /// The period had already been delivered earlier; nothing was sent.
    pub already_delivered: bool,
}

pub struct TrafficService<S, M> {
    collector: Collector<S>,
    aggregator: WindowAggregator,
    repo: Arc<HistoryRepo>,
    messenger: Arc<M>,
    top_n: usize,
    /// Minimum spacing of failure alerts per job; None disables them.
    alert_interval: Option<Duration>,
}

/// Default spacing of failure alerts for one job.
const DEFAULT_ALERT_INTERVAL_SECS: i64 = 300;

impl<S: CounterSource, M: Messenger> TrafficService<S, M> {
    pub fn new(
        source: Arc<S>,
        messenger: Arc<M>,
        repo: Arc<HistoryRepo>,
        reader: ReaderConfig,
        top_n: usize,
    ) -> Self {
        Self {
            collector: Collector::new(source, repo.clone(), reader),
            aggregator: WindowAggregator::new(repo.clone()),
            repo,
            messenger,
            top_n,
            alert_interval: Some(Duration::seconds(DEFAULT_ALERT_INTERVAL_SECS)),
        }
    }

    pub fn with_alert_interval(mut self, interval: Option<Duration>) -> Self {
        self.alert_interval = interval;
        self
    }

    pub fn repo(&self) -> &Arc<HistoryRepo> {
        &self.repo
    }

    pub fn messenger(&self) -> &Arc<M> {
        &self.messenger
    }

    pub fn source(&self) -> &S {
        self.collector.source()
    }

    pub async fn collect(&self) -> anyhow::Result<CycleReport> {
        self.collect_at(Utc::now()).await
    }

    pub async fn collect_at(&self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        self.collector.collect(now).await
    }

    pub async fn bootstrap(&self) -> anyhow::Result<CycleReport> {
        self.bootstrap_at(Utc::now()).await
    }

    pub async fn bootstrap_at(&self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        self.collector.bootstrap(now).await
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        self.repo.health().await
    }

    pub async fn archive_at(&self, now: DateTime<Utc>) -> anyhow::Result<ArchiveSummary> {
        self.repo.archive(now).await
    }

    pub async fn report_daily(&self) -> anyhow::Result<ReportOutcome> {
        self.report_at(ReportKind::Daily, Utc::now()).await
    }

    pub async fn report_weekly(&self) -> anyhow::Result<ReportOutcome> {
        self.report_at(ReportKind::Weekly, Utc::now()).await
    }

    pub async fn report_monthly(&self) -> anyhow::Result<ReportOutcome> {
        self.report_at(ReportKind::Monthly, Utc::now()).await
    }

    /// Rolls up the closed period, renders it and delivers it once per period.
    /// Store failures are returned; delivery failures are logged and reported in
    /// the outcome without marking the period delivered.
    #[instrument(skip(self), fields(operation = "report"))]
    pub async fn report_at(&self, kind: ReportKind, now: DateTime<Utc>) -> anyhow::Result<ReportOutcome> {
        let tz = self.repo.settings().timezone;
        let (from, to) = kind.period(local_date(tz, now));

        for day in days_between(from, to) {
            self.repo.rollup(day, now).await?;
        }
        if kind == ReportKind::Daily {
            self.repo.archive(now).await?;
        }

        let spec = if from == to {
            WindowSpec::Day(from)
        } else {
            WindowSpec::Days { from, to }
        };
        let window = self.aggregator.aggregate(spec, now).await?;
        let top = top_n(window.nodes.values(), self.top_n);
        let resets = self.repo.reset_nodes_between(window.start, window.end).await?;
        let text = format_usage_report(
            kind.title(),
            &window,
            &top,
            self.top_n,
            &ReportNotes {
                resets: &resets,
                skipped: &[],
            },
        );

        let period = if from == to {
            format_day(from)
        } else {
            format!("{}..{}", format_day(from), format_day(to))
        };
        let key = kind.state_key();
        if self.repo.get_state(&key).await?.as_deref() == Some(period.as_str()) {
            info!(kind = %kind, period = %period, "report already delivered; not sending again");
            return Ok(ReportOutcome {
                kind,
                period,
                text,
                delivered: false,
                already_delivered: true,
            });
        }

        let delivered = match self.messenger.send(&text).await {
            Ok(()) => {
                self.repo.set_state(&key, &period).await?;
                info!(kind = %kind, period = %period, nodes = window.nodes.len(), "report delivered");
                true
            }
            Err(e) => {
                warn!(kind = %kind, period = %period, error = %e, "report delivery failed");
                false
            }
        };
        Ok(ReportOutcome {
            kind,
            period,
            text,
            delivered,
            already_delivered: false,
        })
    }

    pub async fn handle_command(&self, text: &str) -> String {
        self.handle_command_at(text, Utc::now()).await
    }

    /// Reply for one chat command. Never fails: bad input and store errors become replies.
    pub async fn handle_command_at(&self, text: &str, now: DateTime<Utc>) -> String {
        let command = match commands::parse(text) {
            Ok(c) => c,
            Err(e) => return command_error_reply(&e),
        };
        match self.answer(command, now).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = %text.trim(), error = %e, "command failed");
                internal_error_reply()
            }
        }
    }

    async fn answer(&self, command: Command, now: DateTime<Utc>) -> anyhow::Result<String> {
        match command {
            Command::Help => Ok(help_text()),
            Command::Usage(spec) => {
                let window = self.aggregator.aggregate(spec, now).await?;
                let top = top_n(window.nodes.values(), self.top_n);
                let (resets, skipped) = self.notes(&window).await?;
                Ok(format_usage_report(
                    &usage_title(spec),
                    &window,
                    &top,
                    self.top_n,
                    &ReportNotes {
                        resets: &resets,
                        skipped: &skipped,
                    },
                ))
            }
            Command::Top(spec) => {
                let (window, top) = rank(&self.aggregator, spec, self.top_n, now).await?;
                let (resets, skipped) = self.notes(&window).await?;
                Ok(format_top(
                    &window,
                    &top,
                    self.top_n,
                    &ReportNotes {
                        resets: &resets,
                        skipped: &skipped,
                    },
                ))
            }
        }
    }

    async fn notes(
        &self,
        window: &WindowTotals,
    ) -> anyhow::Result<(Vec<Node>, Vec<String>)> {
        // A reset observed in the cycle at `end` still belongs to a live window.
        let until = if window.live {
            window.end + Duration::seconds(1)
        } else {
            window.end
        };
        let resets = self.repo.reset_nodes_between(window.start, until).await?;
        let skipped = if window.live {
            last_skipped(&self.repo).await?
        } else {
            Vec::new()
        };
        Ok((resets, skipped))
    }

    pub async fn alert_failure(&self, job: &str, error: &anyhow::Error) -> bool {
        self.alert_failure_at(job, error, Utc::now()).await
    }

    /// Sends a failure alert for `job` unless one went out within the alert interval.
    /// The throttle is kept in the store so separate processes share it. Returns
    /// whether an alert was sent; alerting itself never fails.
    #[instrument(skip(self, error), fields(operation = "alert"))]
    pub async fn alert_failure_at(&self, job: &str, error: &anyhow::Error, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.alert_interval else {
            return false;
        };
        let key = format!("alert.{}.last", job);
        match self.repo.get_state(&key).await {
            Ok(Some(last)) => {
                if let Ok(last) = last.trim().parse::<i64>() {
                    if now.timestamp() - last < interval.num_seconds() {
                        debug!(job, "failure alert throttled");
                        return false;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(job, error = %e, "could not read alert throttle; alerting anyway");
            }
        }
        if let Err(e) = self.repo.set_state(&key, &now.timestamp().to_string()).await {
            warn!(job, error = %e, "could not record alert time");
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown host".into());
        let at = format_instant(self.repo.settings().timezone, now);
        let text = format_failure_alert(job, &host, &at, &format!("{:#}", error));
        match self.messenger.send(&text).await {
            Ok(()) => {
                info!(job, "failure alert sent");
                true
            }
            Err(e) => {
                warn!(job, error = %e, "failure alert not delivered");
                false
            }
        }
    }

    pub fn aggregator(&self) -> &WindowAggregator {
        &self.aggregator
    }
}

fn usage_title(spec: WindowSpec) -> String {
    match spec {
        WindowSpec::Today => "Today's traffic".into(),
        WindowSpec::ThisWeek => "This week's traffic".into(),
        WindowSpec::ThisMonth => "This month's traffic".into(),
        other => format!("Traffic, {}", other),
    }
}
