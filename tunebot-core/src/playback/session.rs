// File: src/playback/session.rs

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use tunebot_common::models::{ChatId, PlayerState, StreamHandle, Track, Volume};
use tunebot_common::traits::StreamTransport;

use crate::Error;
use crate::playback::queue::TrackQueue;

/// Lease over a transport handle. The handle is detached exactly once:
/// either through `release`, or, if the lease is dropped unreleased
/// (error path, cancelled command), by a detach spawned from `Drop`.
pub struct ActiveStream {
    handle: Option<StreamHandle>,
    transport: Arc<dyn StreamTransport>,
}

impl ActiveStream {
    pub fn new(handle: StreamHandle, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            handle: Some(handle),
            transport,
        }
    }

    pub fn handle(&self) -> Option<StreamHandle> {
        self.handle
    }

    /// Detaches the stream. The lease is consumed even when detach fails.
    pub async fn release(mut self) -> Result<(), Error> {
        match self.handle.take() {
            Some(handle) => self.transport.detach(handle).await,
            None => Ok(()),
        }
    }

    /// Drops the lease without calling detach. Only for handles the
    /// transport has already invalidated (forced disconnect).
    pub fn forget(mut self) {
        self.handle.take();
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let transport = self.transport.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!("Releasing dropped stream lease {}", handle);
                rt.spawn(async move {
                    if let Err(e) = transport.detach(handle).await {
                        warn!("Deferred detach of stream {} failed: {:?}", handle, e);
                    }
                });
            }
            Err(_) => warn!("Stream {} dropped outside a runtime; not detached", handle),
        }
    }
}

impl fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveStream").field("handle", &self.handle).finish()
    }
}

/// In-memory state of one chat's playback.
#[derive(Debug)]
pub struct PlaybackSession {
    pub chat_id: ChatId,
    pub queue: TrackQueue,
    pub state: PlayerState,
    pub volume: Volume,
    pub last_activity: DateTime<Utc>,
    pub active_stream: Option<ActiveStream>,
}

impl PlaybackSession {
    pub fn new(chat_id: ChatId, volume: Volume, max_queue: usize, max_history: usize) -> Self {
        Self {
            chat_id,
            queue: TrackQueue::new(max_queue, max_history),
            state: PlayerState::Idle,
            volume,
            last_activity: Utc::now(),
            active_stream: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn active_handle(&self) -> Option<StreamHandle> {
        self.active_stream.as_ref().and_then(|s| s.handle())
    }

    pub fn current_track(&self) -> Option<Track> {
        self.queue.current().cloned()
    }
}

/// Store entry for one chat.
///
/// Two guards: `gate` is a FIFO async mutex held for a whole command,
/// including resolver/transport awaits, so commands for one chat run in
/// arrival order. `state` is a short synchronous lock around the in-memory
/// record and is never held across an await.
pub struct SessionSlot {
    chat_id: ChatId,
    gate: Arc<AsyncMutex<()>>,
    state: Mutex<PlaybackSession>,
    closed: AtomicBool,
}

impl SessionSlot {
    pub fn new(session: PlaybackSession) -> Self {
        Self {
            chat_id: session.chat_id,
            gate: Arc::new(AsyncMutex::new(())),
            state: Mutex::new(session),
            closed: AtomicBool::new(false),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Waits for this chat's command gate.
    pub async fn lock(self: &Arc<Self>) -> LockedSession {
        let gate = self.gate.clone().lock_owned().await;
        LockedSession {
            slot: self.clone(),
            _gate: gate,
        }
    }

    /// Takes the gate only if no command is running.
    pub fn try_lock(self: &Arc<Self>) -> Option<LockedSession> {
        let gate = self.gate.clone().try_lock_owned().ok()?;
        Some(LockedSession {
            slot: self.clone(),
            _gate: gate,
        })
    }

    /// Read access without the gate.
    pub fn with<R>(&self, f: impl FnOnce(&PlaybackSession) -> R) -> R {
        let guard = self.state.lock();
        f(&guard)
    }

    /// Write access without the gate. Only for tests and diagnostics;
    /// playback transitions go through `LockedSession`.
    pub fn with_mut_unchecked<R>(&self, f: impl FnOnce(&mut PlaybackSession) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSlot")
            .field("chat_id", &self.chat_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A slot whose command gate is held by the current task.
pub struct LockedSession {
    slot: Arc<SessionSlot>,
    _gate: OwnedMutexGuard<()>,
}

impl LockedSession {
    pub fn chat_id(&self) -> ChatId {
        self.slot.chat_id
    }

    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    pub fn with<R>(&self, f: impl FnOnce(&PlaybackSession) -> R) -> R {
        self.slot.with(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut PlaybackSession) -> R) -> R {
        let mut guard = self.slot.state.lock();
        f(&mut guard)
    }
}
