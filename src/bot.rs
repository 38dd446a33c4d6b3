// Chat command listener: long-polls the messenger, answers commands from the
// configured chat, persists the update offset after every batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::panel::CounterSource;
use crate::service::TrafficService;
use crate::telegram::{Messenger, Update};

/// Pause after a failed poll before trying again.
const POLL_FAILURE_PAUSE: Duration = Duration::from_secs(3);

pub fn spawn<S, M>(
    service: Arc<TrafficService<S, M>>,
    chat_id: String,
    shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()>
where
    S: CounterSource + 'static,
    M: Messenger + 'static,
{
    tokio::spawn(async move {
        run(service, chat_id, shutdown_rx).await;
    })
}

async fn run<S: CounterSource, M: Messenger>(
    service: Arc<TrafficService<S, M>>,
    chat_id: String,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut offset = match service.repo().get_update_offset().await {
        Ok(o) => o,
        Err(e) => {
            warn!(error = %e, "could not load update offset; starting from the pending queue");
            None
        }
    };
    info!(chat_id = %chat_id, offset = ?offset, "chat listener started");

    loop {
        let updates = tokio::select! {
            r = service.messenger().poll(offset) => r,
            _ = &mut shutdown_rx => {
                debug!("chat listener shutting down");
                break;
            }
        };
        match updates {
            Ok(updates) => {
                if let Err(e) =
                    process_updates(&service, &chat_id, updates, &mut offset, Utc::now()).await
                {
                    warn!(error = %e, "failed to persist update offset");
                }
            }
            Err(e) => {
                warn!(error = %e, "polling for updates failed");
                service
                    .alert_failure("listen", &anyhow::Error::new(e))
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(POLL_FAILURE_PAUSE) => {}
                    _ = &mut shutdown_rx => break,
                }
            }
        }
    }
}

/// Answers every command in `updates` addressed from `chat_id`, advances `offset`
/// past all of them and persists it. Returns the number of replies sent.
pub async fn process_updates<S: CounterSource, M: Messenger>(
    service: &TrafficService<S, M>,
    chat_id: &str,
    updates: Vec<Update>,
    offset: &mut Option<i64>,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    if updates.is_empty() {
        return Ok(0);
    }
    let mut replied = 0;
    for update in updates {
        let next = update.update_id + 1;
        *offset = Some(offset.map_or(next, |o| o.max(next)));

        let Some(message) = update.message else {
            continue;
        };
        if message.chat_id != chat_id {
            debug!(chat_id = %message.chat_id, "ignoring message from another chat");
            continue;
        }
        let text = message.text.trim();
        if !text.starts_with('/') {
            continue;
        }

        let reply = service.handle_command_at(text, now).await;
        match service.messenger().send(&reply).await {
            Ok(()) => replied += 1,
            Err(e) => warn!(command = %text, error = %e, "command reply not delivered"),
        }
    }
    if let Some(o) = *offset {
        service.repo().set_update_offset(o).await?;
    }
    Ok(replied)
}
