// File: src/playback/store.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tunebot_common::models::{ChatId, PlayerState, Volume};

use crate::BotConfig;
use crate::playback::session::{ActiveStream, LockedSession, PlaybackSession, SessionSlot};

/// Initial values for newly created sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    pub volume: Volume,
    pub max_queue_size: usize,
    pub max_history_size: usize,
}

impl From<&BotConfig> for SessionDefaults {
    fn from(cfg: &BotConfig) -> Self {
        Self {
            volume: cfg.default_volume,
            max_queue_size: cfg.max_queue_size,
            max_history_size: cfg.max_history_size,
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        SessionDefaults::from(&BotConfig::default())
    }
}

/// Process-wide map of chat id to session.
///
/// The map is sharded (DashMap) and only locked for lookup/insert/remove,
/// never while a playback command runs.
pub struct SessionStore {
    sessions: DashMap<ChatId, Arc<SessionSlot>>,
    defaults: SessionDefaults,
    sweep_guard: Mutex<()>,
}

impl SessionStore {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            sessions: DashMap::new(),
            defaults,
            sweep_guard: Mutex::new(()),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(SessionDefaults::from(config))
    }

    /// Returns the chat's session, creating an empty Idle one if absent.
    /// Concurrent callers for the same chat always get the same instance.
    pub fn get_or_create(&self, chat_id: ChatId) -> Arc<SessionSlot> {
        self.sessions
            .entry(chat_id)
            .or_insert_with(|| {
                debug!("Creating playback session for chat {}", chat_id);
                Arc::new(SessionSlot::new(PlaybackSession::new(
                    chat_id,
                    self.defaults.volume,
                    self.defaults.max_queue_size,
                    self.defaults.max_history_size,
                )))
            })
            .value()
            .clone()
    }

    pub fn get(&self, chat_id: ChatId) -> Option<Arc<SessionSlot>> {
        self.sessions.get(&chat_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, chat_id: ChatId) -> bool {
        self.sessions.contains_key(&chat_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Detaches and discards a chat's session, stopping its stream first.
    /// Returns false when there was no session.
    pub async fn remove(&self, chat_id: ChatId) -> bool {
        let Some(slot) = self.get(chat_id) else {
            return false;
        };
        let session = slot.lock().await;
        if session.slot().is_closed() {
            return false;
        }
        let stream = self.evict(&session);
        release_logged(chat_id, stream).await;
        info!("Removed playback session for chat {}", chat_id);
        true
    }

    /// Unlinks a locked session from the map and marks it closed.
    /// Hands back the stream lease (if any) so the caller can release it.
    pub(crate) fn evict(&self, session: &LockedSession) -> Option<ActiveStream> {
        let chat_id = session.chat_id();
        let slot = session.slot().clone();
        self.sessions
            .remove_if(&chat_id, |_, existing| Arc::ptr_eq(existing, &slot));
        slot.mark_closed();
        session.with_mut(|s| {
            s.queue.clear();
            s.state = PlayerState::Idle;
            s.active_stream.take()
        })
    }

    /// Evicts Idle sessions with nothing left to play that were untouched
    /// for longer than `idle_threshold`.
    ///
    /// Sessions whose command gate is busy are skipped this round. A second
    /// concurrent sweep returns immediately. Detach failures are logged and
    /// the session is removed regardless.
    pub async fn sweep(&self, idle_threshold: Duration) -> Vec<ChatId> {
        let Ok(_sweeping) = self.sweep_guard.try_lock() else {
            debug!("Idle sweep already running; skipping.");
            return Vec::new();
        };

        let threshold = chrono::Duration::from_std(idle_threshold)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        // Collect first so no map shard is held across an await.
        let candidates: Vec<Arc<SessionSlot>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();

        let mut removed = Vec::new();
        for slot in candidates {
            let Some(session) = slot.try_lock() else {
                continue;
            };
            if slot.is_closed() {
                continue;
            }
            let now = Utc::now();
            let expired = session.with(|s| {
                s.state == PlayerState::Idle
                    && s.queue.is_empty()
                    && now.signed_duration_since(s.last_activity) > threshold
            });
            if !expired {
                continue;
            }
            let chat_id = slot.chat_id();
            let stream = self.evict(&session);
            release_logged(chat_id, stream).await;
            info!("Evicted idle playback session for chat {}", chat_id);
            removed.push(chat_id);
        }
        removed
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionDefaults::default())
    }
}

pub(crate) async fn release_logged(chat_id: ChatId, stream: Option<ActiveStream>) {
    let Some(stream) = stream else {
        return;
    };
    let handle = stream.handle();
    if let Err(e) = stream.release().await {
        warn!("Detach of stream {:?} in chat {} failed: {:?}", handle, chat_id, e);
    }
}
