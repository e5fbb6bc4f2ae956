// File: src/tasks/idle_sweep.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use tunebot_common::models::{ChatId, CloseReason};

use crate::eventbus::{EventBus, PlaybackEvent};
use crate::playback::SessionStore;

/// One sweep: evicts idle sessions and announces each closure on the bus.
pub async fn run_idle_sweep(
    store: &SessionStore,
    event_bus: &EventBus,
    idle_threshold: Duration,
) -> Vec<ChatId> {
    let removed = store.sweep(idle_threshold).await;
    for chat_id in &removed {
        event_bus
            .publish(PlaybackEvent::SessionClosed {
                chat_id: *chat_id,
                reason: CloseReason::IdleTimeout,
            })
            .await;
    }
    if !removed.is_empty() {
        info!("Idle sweep removed {} session(s)", removed.len());
    }
    removed
}

/// Spawns a background task that periodically evicts idle sessions.
/// Stops when the event bus shuts down.
pub fn spawn_idle_sweep_task(
    store: Arc<SessionStore>,
    event_bus: Arc<EventBus>,
    sweep_every: Duration,
    idle_threshold: Duration,
) -> JoinHandle<()> {
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        let mut ticker = interval(sweep_every);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Idle sweep task shutting down.");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    debug!("Running idle sweep over {} session(s)", store.len());
                    run_idle_sweep(&store, &event_bus, idle_threshold).await;
                }
            }
        }
    })
}
