// In-process cron triggers for reports and history archiving. Each configured
// schedule gets its own task that sleeps until the next fire time in the
// statistics timezone.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use crate::config::ReportsConfig;
use crate::panel::CounterSource;
use crate::service::{ReportKind, TrafficService};
use crate::telegram::Messenger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Report(ReportKind),
    Archive,
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub job: Job,
    pub schedule: cron::Schedule,
}

/// Jobs for every schedule set in `[reports]`.
pub fn jobs_from_config(config: &ReportsConfig) -> anyhow::Result<Vec<ScheduledJob>> {
    let mut jobs = Vec::new();
    for (job, expr) in [
        (Job::Report(ReportKind::Daily), &config.daily_schedule),
        (Job::Report(ReportKind::Weekly), &config.weekly_schedule),
        (Job::Report(ReportKind::Monthly), &config.monthly_schedule),
        (Job::Archive, &config.archive_schedule),
    ] {
        if let Some(expr) = expr {
            let schedule = cron::Schedule::from_str(expr)
                .map_err(|e| anyhow::anyhow!("schedule {:?} for {:?}: {}", expr, job, e))?;
            jobs.push(ScheduledJob { job, schedule });
        }
    }
    Ok(jobs)
}

/// One task per job. The tasks run until aborted.
pub fn spawn<S, M>(
    service: Arc<TrafficService<S, M>>,
    jobs: Vec<ScheduledJob>,
    tz: Tz,
) -> Vec<tokio::task::JoinHandle<()>>
where
    S: CounterSource + 'static,
    M: Messenger + 'static,
{
    jobs.into_iter()
        .map(|job| {
            let service = service.clone();
            tokio::spawn(async move {
                run(service, job, tz).await;
            })
        })
        .collect()
}

#[instrument(skip(service, job), fields(job = ?job.job))]
async fn run<S: CounterSource, M: Messenger>(
    service: Arc<TrafficService<S, M>>,
    job: ScheduledJob,
    tz: Tz,
) {
    loop {
        let now = Utc::now().with_timezone(&tz);
        let Some(next) = job.schedule.after(&now).next() else {
            warn!("schedule has no future fire time; job stopped");
            return;
        };
        let delay = (next.clone() - now).to_std().unwrap_or(Duration::from_secs(1));
        info!(next = %next, "next scheduled run");
        tokio::time::sleep(delay).await;
        run_job(&service, job.job).await;
    }
}

async fn run_job<S: CounterSource, M: Messenger>(service: &TrafficService<S, M>, job: Job) {
    let now = Utc::now();
    let (name, result) = match job {
        Job::Report(kind) => {
            let result = match service.report_at(kind, now).await {
                Ok(outcome) if outcome.delivered || outcome.already_delivered => Ok(()),
                Ok(outcome) => Err(anyhow::anyhow!(
                    "{} report for {} was not delivered",
                    kind,
                    outcome.period
                )),
                Err(e) => Err(e),
            };
            (format!("report-{}", kind), result)
        }
        Job::Archive => ("archive".to_string(), service.archive_at(now).await.map(|_| ())),
    };
    if let Err(e) = result {
        warn!(job = %name, error = %e, "scheduled job failed");
        service.alert_failure(&name, &e).await;
    }
}
