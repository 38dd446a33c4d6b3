use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use traffic_reporter::panel::{CounterSource, PanelClient};
use traffic_reporter::service::ReportKind;
use traffic_reporter::*;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Panel traffic reporter: polls node counters, keeps usage history, reports to Telegram.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Poll worker, chat listener, built-in schedules and the optional HTTP server.
    Serve,
    /// Run one polling cycle.
    Collect,
    /// Anchor baselines for every visible node without counting usage.
    Bootstrap,
    /// Report yesterday.
    ReportDaily,
    /// Report last week (Monday to Sunday).
    ReportWeekly,
    /// Report last month.
    ReportMonthly,
    /// Move old daily records into monthly archives and purge expired history.
    Archive,
    /// Check config, store and panel reachability.
    Health,
    /// Parse and validate the config file.
    ConfigValidate,
    /// Print the reply to a chat command without sending it.
    Query {
        /// e.g. "/top 6h"
        text: String,
    },
}

type Service = service::TrafficService<PanelClient, telegram::TelegramClient>;

async fn build_service(config: &config::AppConfig) -> Result<Arc<Service>> {
    let settings = history_repo::StoreSettings::from_config(config)?;
    let repo = Arc::new(
        history_repo::HistoryRepo::connect(
            &config.database.path,
            config.database.max_pool_size,
            settings,
        )
        .await?,
    );
    repo.init().await?;

    let panel = Arc::new(PanelClient::new(&config.panel)?);
    let messenger = Arc::new(telegram::TelegramClient::new(&config.telegram)?);
    let reader = reader::ReaderConfig {
        workers: config.panel.fetch_workers,
        timeout: Duration::from_secs(config.panel.timeout_secs),
    };
    let alert_interval = config
        .alerts
        .enabled
        .then(|| chrono::Duration::seconds(config.alerts.min_interval_secs as i64));
    Ok(Arc::new(
        service::TrafficService::new(panel, messenger, repo, reader, config.reports.top_n)
            .with_alert_interval(alert_interval),
    ))
}

/// Passes `result` through, alerting the chat when it is an error.
async fn alerting<T>(service: &Service, job: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        service.alert_failure(job, e).await;
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();
    let app_config = config::AppConfig::load()?;

    match cli.command {
        Cmd::ConfigValidate => {
            println!("config ok");
        }
        Cmd::Serve => serve(app_config).await?,
        Cmd::Collect => {
            let service = build_service(&app_config).await?;
            let report = alerting(&service, "collect", service.collect().await).await?;
            println!(
                "observed {} of {} nodes, {} skipped, {} resets",
                report.observed,
                report.listed,
                report.skipped.len(),
                report.resets
            );
        }
        Cmd::Bootstrap => {
            let service = build_service(&app_config).await?;
            let report = alerting(&service, "bootstrap", service.bootstrap().await).await?;
            println!(
                "anchored {} nodes ({} new), {} skipped",
                report.observed,
                report.first_seen,
                report.skipped.len()
            );
        }
        Cmd::ReportDaily => report(&app_config, ReportKind::Daily).await?,
        Cmd::ReportWeekly => report(&app_config, ReportKind::Weekly).await?,
        Cmd::ReportMonthly => report(&app_config, ReportKind::Monthly).await?,
        Cmd::Archive => {
            let service = build_service(&app_config).await?;
            let summary =
                alerting(&service, "archive", service.archive_at(chrono::Utc::now()).await).await?;
            println!(
                "archived {} records ({} months written), purged {} records ({} months deleted)",
                summary.archived_records,
                summary.months_written,
                summary.purged_records,
                summary.months_deleted
            );
        }
        Cmd::Health => {
            let service = build_service(&app_config).await?;
            service.health().await?;
            service.source().ping().await?;
            println!("ok");
        }
        Cmd::Query { text } => {
            let service = build_service(&app_config).await?;
            println!("{}", service.handle_command(&text).await);
        }
    }

    Ok(())
}

async fn report(app_config: &config::AppConfig, kind: ReportKind) -> Result<()> {
    let service = build_service(app_config).await?;
    let result = match kind {
        ReportKind::Daily => service.report_daily().await,
        ReportKind::Weekly => service.report_weekly().await,
        ReportKind::Monthly => service.report_monthly().await,
    }
    .and_then(|outcome| {
        if outcome.already_delivered {
            println!("{} report for {} already delivered", outcome.kind, outcome.period);
        } else if !outcome.delivered {
            anyhow::bail!("{} report for {} was not delivered", outcome.kind, outcome.period);
        }
        Ok(())
    });
    alerting(&service, &format!("report-{}", kind), result).await
}

async fn serve(app_config: config::AppConfig) -> Result<()> {
    let service = build_service(&app_config).await?;
    let tz = app_config.history.tz()?;

    let (worker_shutdown_tx, worker_shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = worker::spawn(
        service.clone(),
        worker::WorkerConfig {
            interval_secs: app_config.sampling.interval_secs,
        },
        worker_shutdown_rx,
    );

    let (bot_shutdown_tx, bot_shutdown_rx) = tokio::sync::oneshot::channel();
    let bot_handle = bot::spawn(
        service.clone(),
        app_config.telegram.chat_id.trim().to_string(),
        bot_shutdown_rx,
    );

    let jobs = scheduler::jobs_from_config(&app_config.reports)?;
    tracing::info!(jobs = jobs.len(), "scheduled jobs configured");
    let schedule_handles = scheduler::spawn(service.clone(), jobs, tz);

    let http = match &app_config.server {
        Some(server) => {
            let app = routes::app(service.repo().clone(), app_config.reports.top_n);
            let addr = format!("{}:{}", server.host, server.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("Listening on http://{}", addr);
            Some(tokio::spawn(async move { axum::serve(listener, app).await }))
        }
        None => None,
    };

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");

    for handle in &schedule_handles {
        handle.abort();
    }
    if let Some(http) = &http {
        http.abort();
    }
    let _ = worker_shutdown_tx.send(());
    let _ = bot_shutdown_tx.send(());
    let _ = worker_handle.await;
    let _ = bot_handle.await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
