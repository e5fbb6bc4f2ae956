use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use tunebot_common::models::{ChatId, TransportEvent};

use crate::Error;
use crate::eventbus::EventBus;
use crate::playback::PlaybackController;

const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(30);

/// Per-chat worker queue. `id` tells a retired lane apart from its successor.
struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Routes asynchronous transport notifications (stream ended, forced
/// disconnect) into the playback controller.
///
/// Each chat gets its own lane: events for one chat are applied in the order
/// the transport emitted them, while a chat stuck behind a slow command gate
/// or attach does not hold up any other chat.
pub struct TransportEventService {
    controller: Arc<PlaybackController>,
    lanes: DashMap<ChatId, Lane>,
    next_lane_id: AtomicU64,
    lane_idle: Duration,
}

impl TransportEventService {
    pub fn new(controller: Arc<PlaybackController>) -> Self {
        debug!("TransportEventService::new() called");
        Self {
            controller,
            lanes: DashMap::new(),
            next_lane_id: AtomicU64::new(1),
            lane_idle: DEFAULT_LANE_IDLE,
        }
    }

    /// How long a lane waits for another event before its worker exits.
    pub fn with_lane_idle(mut self, lane_idle: Duration) -> Self {
        self.lane_idle = lane_idle;
        self
    }

    /// Number of chats with a live worker.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Applies one transport event. Returns true when it changed playback
    /// state (a stale stream end returns false).
    pub async fn handle_event(&self, event: TransportEvent) -> Result<bool, Error> {
        match event {
            TransportEvent::StreamEnded { chat_id, handle } => {
                self.controller.stream_ended(chat_id, handle).await
            }
            TransportEvent::Disconnected { chat_id, reason } => {
                self.controller.transport_disconnected(chat_id, &reason).await;
                Ok(true)
            }
        }
    }

    /// Spawns the dispatcher task. It only routes events to per-chat lanes;
    /// the lanes do the work. On shutdown the already-buffered events are
    /// routed, every lane finishes its backlog, and the task returns the
    /// total number of events applied.
    pub fn spawn(
        self: Arc<Self>,
        mut events_rx: mpsc::Receiver<TransportEvent>,
        event_bus: &EventBus,
    ) -> JoinHandle<usize> {
        let mut shutdown_rx = event_bus.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut handled = 0usize;
            let mut workers: JoinSet<usize> = JoinSet::new();
            info!("Transport event task started.");

            loop {
                tokio::select! {
                    biased;
                    maybe_event = events_rx.recv() => {
                        match maybe_event {
                            Some(event) => self.route(event, &mut workers),
                            None => {
                                info!("Transport event channel closed => break from loop.");
                                break;
                            }
                        }
                    },
                    Some(done) = workers.join_next(), if !workers.is_empty() => {
                        handled += lane_result(done);
                    },
                    Ok(_) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Transport event task shutting down => draining.");
                            break;
                        }
                    }
                }
            }

            while let Ok(event) = events_rx.try_recv() {
                self.route(event, &mut workers);
            }
            // Dropping the senders lets each worker finish its backlog and exit.
            self.lanes.clear();
            while let Some(done) = workers.join_next().await {
                handled += lane_result(done);
            }

            info!("Transport event task exited after {} events.", handled);
            handled
        })
    }

    fn route(self: &Arc<Self>, event: TransportEvent, workers: &mut JoinSet<usize>) {
        let chat_id = event.chat_id();

        // Sends happen under the map guard, so a lane cannot retire between
        // the lookup and the send without the send failing.
        let event = match self.lanes.get(&chat_id) {
            Some(lane) => match lane.tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let id = self.next_lane_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            warn!("Lane for chat {} closed before its first event", chat_id);
            return;
        }
        self.lanes.insert(chat_id, Lane { id, tx });
        debug!("Opened transport lane {} for chat {}", id, chat_id);
        workers.spawn(self.clone().run_lane(chat_id, id, rx));
    }

    async fn run_lane(
        self: Arc<Self>,
        chat_id: ChatId,
        lane_id: u64,
        mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> usize {
        let mut handled = 0usize;
        loop {
            match tokio::time::timeout(self.lane_idle, rx.recv()).await {
                Ok(Some(event)) => {
                    self.apply(event).await;
                    handled += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let retired = self
                        .lanes
                        .remove_if(&chat_id, |_, lane| lane.id == lane_id && rx.is_empty())
                        .is_some();
                    if retired {
                        break;
                    }
                }
            }
        }
        // Anything that slipped in after the last recv still belongs to this chat.
        while let Ok(event) = rx.try_recv() {
            self.apply(event).await;
            handled += 1;
        }
        debug!("Transport lane {} for chat {} done after {} events", lane_id, chat_id, handled);
        handled
    }

    async fn apply(&self, event: TransportEvent) {
        let chat_id = event.chat_id();
        match self.handle_event(event).await {
            Ok(true) => debug!("Applied transport event for chat {}", chat_id),
            Ok(false) => debug!("Ignored stale transport event for chat {}", chat_id),
            Err(e) => error!("Transport event for chat {} failed: {:?}", chat_id, e),
        }
    }
}

fn lane_result(done: Result<usize, tokio::task::JoinError>) -> usize {
    match done {
        Ok(n) => n,
        Err(e) => {
            error!("Transport lane task failed: {:?}", e);
            0
        }
    }
}

/// Convenience wrapper used by the server wiring.
pub fn spawn_transport_event_task(
    controller: Arc<PlaybackController>,
    events_rx: mpsc::Receiver<TransportEvent>,
    event_bus: &EventBus,
) -> JoinHandle<usize> {
    Arc::new(TransportEventService::new(controller)).spawn(events_rx, event_bus)
}
