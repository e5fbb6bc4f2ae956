// File: tunebot-core/src/test_utils/helpers.rs
//
// In-memory fakes shared by unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

use tunebot_common::models::{ChatId, StreamHandle, Track, UserId, Volume};
use tunebot_common::traits::{StreamTransport, TrackResolver};

use crate::eventbus::EventBus;
use crate::playback::{PlaybackController, SessionStore};
use crate::{BotConfig, Error};

/// Builds a track with a predictable source uri.
pub fn track(title: &str, secs: u64) -> Track {
    Track::new(title, "Test Artist", Duration::from_secs(secs), format!("test://{}", title))
}

/// Everything a `RecordingTransport` was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Attach { chat_id: ChatId, source_uri: String, volume: Volume, handle: StreamHandle },
    Detach(StreamHandle),
    Pause(StreamHandle),
    Resume(StreamHandle),
    SetVolume(StreamHandle, Volume),
}

/// Transport fake that records calls and can be told to fail or stall.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_attach_for: Mutex<HashSet<String>>,
    fail_detach: AtomicBool,
    fail_set_volume: AtomicBool,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before completing.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn fail_attach_for(&self, source_uri: &str) {
        self.fail_attach_for.lock().insert(source_uri.to_string());
    }

    pub fn set_fail_detach(&self, fail: bool) {
        self.fail_detach.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_set_volume(&self, fail: bool) {
        self.fail_set_volume.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Handles minted so far, oldest first.
    pub fn attached_handles(&self) -> Vec<StreamHandle> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Attach { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn attached_sources(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Attach { source_uri, .. } => Some(source_uri.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.attached_handles().len()
    }

    pub fn detach_count(&self, handle: StreamHandle) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| **c == TransportCall::Detach(handle))
            .count()
    }

    pub fn total_detaches(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Detach(_)))
            .count()
    }

    /// Highest number of calls that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn leave(&self, call: TransportCall) {
        self.calls.lock().push(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamTransport for RecordingTransport {
    async fn attach(&self, chat_id: ChatId, source_uri: &str, volume: Volume) -> Result<StreamHandle, Error> {
        self.enter().await;
        if self.fail_attach_for.lock().contains(source_uri) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Attach(format!("cannot open {}", source_uri)));
        }
        let handle = StreamHandle::new();
        self.leave(TransportCall::Attach {
            chat_id,
            source_uri: source_uri.to_string(),
            volume,
            handle,
        });
        Ok(handle)
    }

    async fn detach(&self, handle: StreamHandle) -> Result<(), Error> {
        self.enter().await;
        self.leave(TransportCall::Detach(handle));
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(Error::Transport("detach failed".to_string()));
        }
        Ok(())
    }

    async fn pause(&self, handle: StreamHandle) -> Result<(), Error> {
        self.enter().await;
        self.leave(TransportCall::Pause(handle));
        Ok(())
    }

    async fn resume(&self, handle: StreamHandle) -> Result<(), Error> {
        self.enter().await;
        self.leave(TransportCall::Resume(handle));
        Ok(())
    }

    async fn set_volume(&self, handle: StreamHandle, volume: Volume) -> Result<(), Error> {
        self.enter().await;
        if self.fail_set_volume.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Transport("volume rejected".to_string()));
        }
        self.leave(TransportCall::SetVolume(handle, volume));
        Ok(())
    }
}

/// Resolver fake: any query resolves to a 3 minute track titled after the
/// query unless told otherwise.
#[derive(Default)]
pub struct StaticResolver {
    durations: Mutex<HashMap<String, u64>>,
    unknown: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn set_duration(&self, query: &str, secs: u64) {
        self.durations.lock().insert(query.to_string(), secs);
    }

    pub fn fail_for(&self, query: &str) {
        self.unknown.lock().insert(query.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackResolver for StaticResolver {
    async fn resolve(&self, query: &str, requested_by: Option<UserId>) -> Result<Track, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if self.unknown.lock().contains(query) {
            return Err(Error::TrackNotFound(query.to_string()));
        }
        let secs = self.durations.lock().get(query).copied().unwrap_or(180);
        Ok(track(query, secs).requested_by(requested_by))
    }
}

/// A controller wired to fresh fakes.
pub struct TestHarness {
    pub controller: Arc<PlaybackController>,
    pub store: Arc<SessionStore>,
    pub transport: Arc<RecordingTransport>,
    pub resolver: Arc<StaticResolver>,
    pub event_bus: Arc<EventBus>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(BotConfig::default())
    }

    pub fn with_config(config: BotConfig) -> Self {
        Self::with_parts(config, StaticResolver::new(), RecordingTransport::new())
    }

    pub fn with_parts(config: BotConfig, resolver: StaticResolver, transport: RecordingTransport) -> Self {
        let store = Arc::new(SessionStore::from_config(&config));
        let transport = Arc::new(transport);
        let resolver = Arc::new(resolver);
        let event_bus = Arc::new(EventBus::new());
        let controller = Arc::new(PlaybackController::new(
            store.clone(),
            resolver.clone(),
            transport.clone(),
            event_bus.clone(),
            config,
        ));
        Self {
            controller,
            store,
            transport,
            resolver,
            event_bus,
        }
    }

    /// Titles of a chat's queue, in order.
    pub fn queue_titles(&self, chat_id: ChatId) -> Vec<String> {
        self.controller
            .get_queue(chat_id)
            .into_iter()
            .map(|t| t.title)
            .collect()
    }

    pub fn current_title(&self, chat_id: ChatId) -> Option<String> {
        self.controller.get_current(chat_id).map(|t| t.title)
    }

    pub fn active_handle(&self, chat_id: ChatId) -> Option<StreamHandle> {
        self.store.get(chat_id).and_then(|slot| slot.with(|s| s.active_handle()))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
