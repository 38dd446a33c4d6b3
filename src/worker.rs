// Background poll worker: one collect cycle per sampling interval until shutdown.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::Instrument;

use crate::panel::CounterSource;
use crate::service::TrafficService;
use crate::telegram::Messenger;

pub struct WorkerConfig {
    pub interval_secs: u64,
}

pub fn spawn<S, M>(
    service: Arc<TrafficService<S, M>>,
    config: WorkerConfig,
    shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()>
where
    S: CounterSource + 'static,
    M: Messenger + 'static,
{
    let worker_span = tracing::span!(
        tracing::Level::DEBUG,
        "worker",
        interval_secs = config.interval_secs
    );
    tokio::spawn(run(service, config, shutdown_rx).instrument(worker_span))
}

async fn run<S: CounterSource, M: Messenger>(
    service: Arc<TrafficService<S, M>>,
    config: WorkerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // First tick fires immediately: a sample right at startup.
    let mut tick = interval(Duration::from_secs(config.interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut cycles_ok: u64 = 0;
    let mut cycles_failed: u64 = 0;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match service.collect().await {
                    Ok(_) => cycles_ok += 1,
                    Err(e) => {
                        cycles_failed += 1;
                        tracing::warn!(
                            error = %e,
                            operation = "collect",
                            "poll cycle failed; retrying next interval"
                        );
                        service.alert_failure("collect", &e).await;
                    }
                }
            }
            _ = &mut shutdown_rx => {
                tracing::debug!(cycles_ok, cycles_failed, "Worker shutting down");
                break;
            }
        }
    }
}
