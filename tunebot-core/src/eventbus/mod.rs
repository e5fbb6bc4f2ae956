//! src/eventbus/mod.rs
//!
//! Provides an in-process event bus that supports guaranteed delivery
//! to multiple subscribers via bounded MPSC queues.

pub mod event_logger;

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use chrono::{DateTime, Utc};
use tunebot_common::models::{ChatId, CloseReason, StreamHandle, Track, Volume};

/// Events published by the playback core. History/favorites collaborators
/// subscribe to `TrackStarted`; nothing here is ever read back by the core.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// A stream was attached and a track began playing.
    TrackStarted {
        chat_id: ChatId,
        track: Track,
        handle: StreamHandle,
        timestamp: DateTime<Utc>,
    },

    /// A track was appended behind whatever is currently playing.
    TrackQueued {
        chat_id: ChatId,
        track: Track,
        position: usize,
    },

    PlaybackPaused { chat_id: ChatId },

    PlaybackResumed { chat_id: ChatId },

    VolumeChanged { chat_id: ChatId, volume: Volume },

    /// The last queued track finished and the session went Idle.
    QueueFinished { chat_id: ChatId },

    /// The session was removed from the store.
    SessionClosed { chat_id: ChatId, reason: CloseReason },

    /// The transport reported a forced disconnect (kicked, call closed).
    TransportDisconnected { chat_id: ChatId, reason: String },

    /// Free-form administrative message.
    SystemMessage(String),
}

impl PlaybackEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> String {
        match self {
            PlaybackEvent::TrackStarted { .. } => "track.started".to_string(),
            PlaybackEvent::TrackQueued { .. } => "track.queued".to_string(),
            PlaybackEvent::PlaybackPaused { .. } => "playback.paused".to_string(),
            PlaybackEvent::PlaybackResumed { .. } => "playback.resumed".to_string(),
            PlaybackEvent::VolumeChanged { .. } => "playback.volume".to_string(),
            PlaybackEvent::QueueFinished { .. } => "queue.finished".to_string(),
            PlaybackEvent::SessionClosed { .. } => "session.closed".to_string(),
            PlaybackEvent::TransportDisconnected { .. } => "transport.disconnected".to_string(),
            PlaybackEvent::SystemMessage(_) => "system_message".to_string(),
        }
    }

    /// Get the chat this event belongs to
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            PlaybackEvent::TrackStarted { chat_id, .. }
            | PlaybackEvent::TrackQueued { chat_id, .. }
            | PlaybackEvent::PlaybackPaused { chat_id }
            | PlaybackEvent::PlaybackResumed { chat_id }
            | PlaybackEvent::VolumeChanged { chat_id, .. }
            | PlaybackEvent::QueueFinished { chat_id }
            | PlaybackEvent::SessionClosed { chat_id, .. }
            | PlaybackEvent::TransportDisconnected { chat_id, .. } => Some(*chat_id),
            PlaybackEvent::SystemMessage(_) => None,
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<PlaybackEvent>` for guaranteed delivery.
///
/// - If the subscriber’s channel buffer fills, `publish` will await
///   until there's space (backpressure).
/// - If the subscriber has dropped the `Receiver`, the channel is closed
///   and sending returns an error.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<PlaybackEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Default size for each subscriber’s buffer.
const DEFAULT_BUFFER_SIZE: usize = 10000;

impl EventBus {
    /// Create a new, empty event bus.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<PlaybackEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Publish an event to all subscribers. Closed subscribers are pruned.
    pub async fn publish(&self, event: PlaybackEvent) {
        let senders = {
            let mut subs = self.subscribers.lock().await;
            subs.retain(|s| !s.is_closed());
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }

    /// Convenience method: publish a `SystemMessage` event.
    pub async fn publish_system(&self, text: &str) {
        self.publish(PlaybackEvent::SystemMessage(text.to_string())).await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();

        let mut rx1 = bus.subscribe(Some(5)).await;
        let mut rx2 = bus.subscribe(Some(5)).await;

        bus.publish(PlaybackEvent::QueueFinished { chat_id: ChatId(1) }).await;

        let evt1 = rx1.recv().await.expect("rx1 should get event");
        let evt2 = rx2.recv().await.expect("rx2 should get event");

        match evt1 {
            PlaybackEvent::QueueFinished { chat_id } => assert_eq!(chat_id, ChatId(1)),
            _ => panic!("rx1 got the wrong event type"),
        }
        match evt2 {
            PlaybackEvent::QueueFinished { .. } => { /* OK */ }
            _ => panic!("rx2 got the wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_backpressure_blocking() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Some(1)).await; // queue size = 1

        // Publish first message to fill the queue.
        bus.publish_system("msg1").await;

        // Spawn a task that reads the two messages after a short delay.
        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let first = rx.recv().await.expect("expected first message");
            let second = rx.recv().await.expect("expected second message");
            (first, second)
        });

        // Publish the second message (this call will wait until there's space).
        let second_publish = bus.publish_system("msg2");
        let result = timeout(Duration::from_millis(500), second_publish).await;
        assert!(result.is_ok(), "publish should eventually unblock");

        let (evt1, evt2) = handle.await.unwrap();
        if let PlaybackEvent::SystemMessage(txt) = evt1 {
            assert_eq!(txt, "msg1");
        } else {
            panic!("first message mismatch");
        }
        if let PlaybackEvent::SystemMessage(txt) = evt2 {
            assert_eq!(txt, "msg2");
        } else {
            panic!("second message mismatch");
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_publish() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Some(1)).await;
        drop(rx);
        let mut live = bus.subscribe(Some(4)).await;

        let res = timeout(Duration::from_millis(200), bus.publish_system("hello")).await;
        assert!(res.is_ok());
        assert!(matches!(live.recv().await, Some(PlaybackEvent::SystemMessage(_))));
    }

    #[test]
    fn test_event_metadata() {
        let evt = PlaybackEvent::SessionClosed {
            chat_id: ChatId(-100),
            reason: CloseReason::Stopped,
        };
        assert_eq!(evt.event_type(), "session.closed");
        assert_eq!(evt.chat_id(), Some(ChatId(-100)));
        assert_eq!(PlaybackEvent::SystemMessage("x".into()).chat_id(), None);
    }
}
