//! src/eventbus/event_logger.rs
//!
//! Spawns a task that subscribes to the EventBus and writes every
//! PlaybackEvent to the tracing log. Drains the queue on shutdown.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::eventbus::{EventBus, PlaybackEvent};

/// Spawns the logger. The returned handle resolves to the number of events
/// logged once the bus shuts down or every publisher is gone.
pub async fn spawn_event_logger_task(event_bus: &EventBus, buffer_size: usize) -> JoinHandle<usize> {
    let mut rx = event_bus.subscribe(Some(buffer_size)).await;
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        let mut logged = 0usize;
        info!("Event logger task started with buffer_size={}", buffer_size);

        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            log_event(&event);
                            logged += 1;
                        }
                        None => {
                            info!("Event logger channel closed => break from loop.");
                            break;
                        }
                    }
                },
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Event logger shutting down => break from loop.");
                        break;
                    }
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            log_event(&event);
            logged += 1;
        }

        info!("Event logger task exited after {} events.", logged);
        logged
    })
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::TrackStarted { chat_id, track, handle, .. } => {
            info!(
                "[{}] chat={} now playing '{}' ({}) requested_by={:?} handle={}",
                event.event_type(), chat_id, track.display_name(), track.formatted_duration(),
                track.requested_by, handle
            );
        }
        PlaybackEvent::TrackQueued { chat_id, track, position } => {
            info!("[{}] chat={} #{} '{}'", event.event_type(), chat_id, position, track.display_name());
        }
        PlaybackEvent::TransportDisconnected { chat_id, reason } => {
            warn!("[{}] chat={} reason={}", event.event_type(), chat_id, reason);
        }
        PlaybackEvent::SessionClosed { chat_id, reason } => {
            info!("[{}] chat={} reason={}", event.event_type(), chat_id, reason);
        }
        PlaybackEvent::VolumeChanged { chat_id, volume } => {
            info!("[{}] chat={} volume={}", event.event_type(), chat_id, volume);
        }
        PlaybackEvent::SystemMessage(text) => {
            info!("[{}] {}", event.event_type(), text);
        }
        other => {
            info!("[{}] chat={:?}", other.event_type(), other.chat_id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunebot_common::models::ChatId;

    #[tokio::test]
    async fn drains_pending_events_on_shutdown() {
        let bus = EventBus::new();
        let handle = spawn_event_logger_task(&bus, 16).await;

        bus.publish(PlaybackEvent::PlaybackPaused { chat_id: ChatId(5) }).await;
        bus.publish(PlaybackEvent::PlaybackResumed { chat_id: ChatId(5) }).await;
        bus.publish_system("bye").await;
        bus.shutdown();

        let logged = handle.await.expect("logger task panicked");
        assert_eq!(logged, 3);
    }
}
