// File: src/platforms/loopback.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use tunebot_common::models::{ChatId, StreamHandle, TransportEvent, Volume};
use tunebot_common::traits::StreamTransport;

use crate::Error;
use crate::platforms::catalog::Catalog;

/// Length assumed for sources the catalogue does not know.
const FALLBACK_DURATION: Duration = Duration::from_secs(180);

#[derive(Debug)]
struct LoopbackStream {
    chat_id: ChatId,
    source_uri: String,
    volume: Volume,
    remaining: Duration,
    started_at: Instant,
    paused: bool,
    timer: Option<JoinHandle<()>>,
}

/// A transport that plays nothing. Each attached stream is a timer that
/// emits `StreamEnded` once the track's (scaled) duration has elapsed.
pub struct LoopbackTransport {
    streams: Arc<DashMap<StreamHandle, LoopbackStream>>,
    catalog: Catalog,
    events_tx: mpsc::Sender<TransportEvent>,
    speed: f64,
}

impl LoopbackTransport {
    pub fn new(catalog: Catalog, events_tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            catalog,
            events_tx,
            speed: 1.0,
        }
    }

    /// Plays tracks `speed` times faster than real time. Non-positive values are ignored.
    pub fn with_speed(mut self, speed: f64) -> Self {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        } else {
            warn!("Ignoring invalid loopback speed {}", speed);
        }
        self
    }

    /// Simulates the bot being kicked from the call: drops every stream of
    /// the chat and reports `Disconnected`.
    pub async fn disconnect(&self, chat_id: ChatId, reason: &str) {
        let handles = self.handles_for(chat_id);
        for handle in &handles {
            if let Some((_, stream)) = self.streams.remove(handle) {
                if let Some(timer) = stream.timer {
                    timer.abort();
                }
            }
        }
        info!("Loopback disconnect in chat {} ({} streams): {}", chat_id, handles.len(), reason);
        let event = TransportEvent::Disconnected {
            chat_id,
            reason: reason.to_string(),
        };
        if self.events_tx.send(event).await.is_err() {
            warn!("Transport event receiver is gone; disconnect for chat {} lost", chat_id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_attached(&self, handle: StreamHandle) -> bool {
        self.streams.contains_key(&handle)
    }

    pub fn is_paused(&self, handle: StreamHandle) -> bool {
        self.streams.get(&handle).map(|s| s.paused).unwrap_or(false)
    }

    pub fn volume_of(&self, handle: StreamHandle) -> Option<Volume> {
        self.streams.get(&handle).map(|s| s.volume)
    }

    pub fn source_of(&self, handle: StreamHandle) -> Option<String> {
        self.streams.get(&handle).map(|s| s.source_uri.clone())
    }

    pub fn handles_for(&self, chat_id: ChatId) -> Vec<StreamHandle> {
        self.streams
            .iter()
            .filter(|entry| entry.value().chat_id == chat_id)
            .map(|entry| *entry.key())
            .collect()
    }

    fn spawn_timer(&self, handle: StreamHandle, chat_id: ChatId, after: Duration) -> JoinHandle<()> {
        let streams = self.streams.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            sleep(after).await;
            if streams.remove(&handle).is_none() {
                return;
            }
            debug!("Loopback stream {} finished in chat {}", handle, chat_id);
            let _ = events_tx
                .send(TransportEvent::StreamEnded { chat_id, handle })
                .await;
        })
    }

    fn unknown(handle: StreamHandle) -> Error {
        Error::Transport(format!("unknown stream {}", handle))
    }
}

#[async_trait]
impl StreamTransport for LoopbackTransport {
    async fn attach(&self, chat_id: ChatId, source_uri: &str, volume: Volume) -> Result<StreamHandle, Error> {
        if source_uri.trim().is_empty() {
            return Err(Error::Attach("empty source uri".to_string()));
        }
        let duration = self
            .catalog
            .duration_of(source_uri)
            .unwrap_or(FALLBACK_DURATION)
            .div_f64(self.speed);

        let handle = StreamHandle::new();
        // Insert before the timer exists so a zero-length track still finds its entry.
        self.streams.insert(
            handle,
            LoopbackStream {
                chat_id,
                source_uri: source_uri.to_string(),
                volume,
                remaining: duration,
                started_at: Instant::now(),
                paused: false,
                timer: None,
            },
        );
        let timer = self.spawn_timer(handle, chat_id, duration);
        match self.streams.get_mut(&handle) {
            Some(mut stream) => stream.timer = Some(timer),
            None => timer.abort(),
        }
        debug!("Loopback attached {} in chat {} as {} ({:?})", source_uri, chat_id, handle, duration);
        Ok(handle)
    }

    async fn detach(&self, handle: StreamHandle) -> Result<(), Error> {
        if let Some((_, stream)) = self.streams.remove(&handle) {
            if let Some(timer) = stream.timer {
                timer.abort();
            }
            debug!("Loopback detached {}", handle);
        }
        Ok(())
    }

    async fn pause(&self, handle: StreamHandle) -> Result<(), Error> {
        let mut stream = self.streams.get_mut(&handle).ok_or_else(|| Self::unknown(handle))?;
        if stream.paused {
            return Ok(());
        }
        if let Some(timer) = stream.timer.take() {
            timer.abort();
        }
        stream.remaining = stream.remaining.saturating_sub(stream.started_at.elapsed());
        stream.paused = true;
        Ok(())
    }

    async fn resume(&self, handle: StreamHandle) -> Result<(), Error> {
        let (chat_id, remaining) = {
            let mut stream = self.streams.get_mut(&handle).ok_or_else(|| Self::unknown(handle))?;
            if !stream.paused {
                return Ok(());
            }
            stream.paused = false;
            stream.started_at = Instant::now();
            (stream.chat_id, stream.remaining)
        };
        let timer = self.spawn_timer(handle, chat_id, remaining);
        match self.streams.get_mut(&handle) {
            Some(mut stream) => stream.timer = Some(timer),
            None => timer.abort(),
        }
        Ok(())
    }

    async fn set_volume(&self, handle: StreamHandle, volume: Volume) -> Result<(), Error> {
        let mut stream = self.streams.get_mut(&handle).ok_or_else(|| Self::unknown(handle))?;
        stream.volume = volume;
        Ok(())
    }
}
