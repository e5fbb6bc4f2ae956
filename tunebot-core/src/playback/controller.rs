// File: src/playback/controller.rs

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use tunebot_common::models::{
    ChatId, CloseReason, PlayOutcome, PlayerState, StreamHandle, Track, UserId, Volume,
};
use tunebot_common::traits::{StreamTransport, TrackResolver};

use crate::BotConfig;
use crate::Error;
use crate::eventbus::{EventBus, PlaybackEvent};
use crate::playback::queue::TrackQueue;
use crate::playback::session::{ActiveStream, LockedSession};
use crate::playback::store::{release_logged, SessionStore};

/// The per-chat playback state machine and the command surface the
/// dispatcher calls into.
///
/// Every mutating command first takes the chat's command gate, so commands
/// and transport events for one chat apply strictly in arrival order while
/// different chats proceed in parallel.
pub struct PlaybackController {
    store: Arc<SessionStore>,
    resolver: Arc<dyn TrackResolver>,
    transport: Arc<dyn StreamTransport>,
    event_bus: Arc<EventBus>,
    config: BotConfig,
}

impl PlaybackController {
    pub fn new(
        store: Arc<SessionStore>,
        resolver: Arc<dyn TrackResolver>,
        transport: Arc<dyn StreamTransport>,
        event_bus: Arc<EventBus>,
        config: BotConfig,
    ) -> Self {
        debug!("Initializing PlaybackController");
        Self {
            store,
            resolver,
            transport,
            event_bus,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Resolves and queues `query` (if any) and starts playback when Idle.
    ///
    ///  - Idle: the head of the queue is attached and the session goes Playing.
    ///  - Playing/Paused with a query: the track is only queued.
    ///  - Paused without a query: resumes.
    pub async fn play(
        &self,
        chat_id: ChatId,
        query: Option<&str>,
        requested_by: Option<UserId>,
    ) -> Result<PlayOutcome, Error> {
        debug!("play() chat={} query={:?}", chat_id, query);
        let session = self.acquire(chat_id, query.is_some()).await?;

        let queued = match query {
            Some(q) => Some(self.resolve_and_enqueue(&session, q, requested_by).await?),
            None => None,
        };

        match session.with(|s| s.state) {
            PlayerState::Idle => {
                if session.with(|s| s.queue.is_empty()) {
                    return Err(Error::NoActiveSession(chat_id));
                }
                match self.start_with(&session, |q| q.start_at(0)).await? {
                    Some(track) => Ok(PlayOutcome::Started { track, position: 1 }),
                    None => Err(Error::NoActiveSession(chat_id)),
                }
            }
            PlayerState::Playing | PlayerState::Paused if queued.is_some() => {
                let (position, track) = queued.ok_or(Error::NoActiveSession(chat_id))?;
                self.event_bus
                    .publish(PlaybackEvent::TrackQueued {
                        chat_id,
                        track: track.clone(),
                        position,
                    })
                    .await;
                Ok(PlayOutcome::Queued { track, position })
            }
            PlayerState::Paused => {
                self.resume_locked(&session).await?;
                Ok(PlayOutcome::Resumed)
            }
            PlayerState::Playing => Err(Error::AlreadyPlaying),
            PlayerState::Stopping => Err(Error::NoActiveSession(chat_id)),
        }
    }

    /// Resolves and queues a track without starting playback.
    /// Returns the assigned 1-based position.
    pub async fn enqueue(
        &self,
        chat_id: ChatId,
        query: &str,
        requested_by: Option<UserId>,
    ) -> Result<(usize, Track), Error> {
        debug!("enqueue() chat={} query='{}'", chat_id, query);
        let session = self.acquire(chat_id, true).await?;
        let (position, track) = self.resolve_and_enqueue(&session, query, requested_by).await?;
        self.event_bus
            .publish(PlaybackEvent::TrackQueued {
                chat_id,
                track: track.clone(),
                position,
            })
            .await;
        Ok((position, track))
    }

    pub async fn pause(&self, chat_id: ChatId) -> Result<(), Error> {
        debug!("pause() chat={}", chat_id);
        let session = self.acquire(chat_id, false).await?;
        match session.with(|s| s.state) {
            PlayerState::Playing => {}
            PlayerState::Paused => return Err(Error::AlreadyPaused),
            _ => return Err(Error::NoActiveSession(chat_id)),
        }
        let handle = self.require_handle(&session)?;

        self.transport.pause(handle).await.map_err(as_transport_error)?;
        session.with_mut(|s| {
            s.state = PlayerState::Paused;
            s.touch();
        });
        info!("Paused playback in chat {}", chat_id);
        self.event_bus.publish(PlaybackEvent::PlaybackPaused { chat_id }).await;
        Ok(())
    }

    pub async fn resume(&self, chat_id: ChatId) -> Result<(), Error> {
        debug!("resume() chat={}", chat_id);
        let session = self.acquire(chat_id, false).await?;
        self.resume_locked(&session).await
    }

    /// Stops the current stream and starts the next queued track.
    /// Returns the new track, or `None` when the queue ran out (session Idle).
    pub async fn skip(&self, chat_id: ChatId) -> Result<Option<Track>, Error> {
        debug!("skip() chat={}", chat_id);
        let session = self.acquire(chat_id, false).await?;
        if !session.with(|s| s.state.is_active()) {
            return Err(Error::NoActiveSession(chat_id));
        }
        self.advance(&session).await
    }

    /// Stops playback, clears the queue and removes the session.
    /// The stream handle is released unconditionally.
    pub async fn stop(&self, chat_id: ChatId) -> Result<(), Error> {
        debug!("stop() chat={}", chat_id);
        let session = self.acquire(chat_id, false).await?;

        let stream = session.with_mut(|s| {
            s.state = PlayerState::Stopping;
            s.active_stream.take()
        });
        release_logged(chat_id, stream).await;

        // evict clears the queue and sets Idle; nothing is attached any more.
        let leftover = self.store.evict(&session);
        release_logged(chat_id, leftover).await;

        info!("Stopped playback and closed session in chat {}", chat_id);
        self.event_bus
            .publish(PlaybackEvent::SessionClosed {
                chat_id,
                reason: CloseReason::Stopped,
            })
            .await;
        Ok(())
    }

    /// Validates and applies a new volume. When a stream is attached the
    /// transport is updated first; on failure the old level is kept.
    pub async fn set_volume(&self, chat_id: ChatId, level: i64) -> Result<Volume, Error> {
        debug!("set_volume() chat={} level={}", chat_id, level);
        let volume = Volume::new(level)?;
        let session = self.acquire(chat_id, false).await?;

        if let Some(handle) = session.with(|s| s.active_handle()) {
            self.transport
                .set_volume(handle, volume)
                .await
                .map_err(as_transport_error)?;
        }
        session.with_mut(|s| {
            s.volume = volume;
            s.touch();
        });
        info!("Volume set to {} in chat {}", volume, chat_id);
        self.event_bus
            .publish(PlaybackEvent::VolumeChanged { chat_id, volume })
            .await;
        Ok(volume)
    }

    /// Removes the entry at a 1-based position. Removing the playing entry
    /// stops it and starts whatever followed it.
    pub async fn remove(&self, chat_id: ChatId, position: usize) -> Result<Track, Error> {
        debug!("remove() chat={} position={}", chat_id, position);
        let session = self.acquire(chat_id, false).await?;

        let is_current = session.with(|s| s.queue.current_position() == Some(position));
        if !is_current {
            let removed = session.with_mut(|s| {
                let removed = s.queue.remove_at(position);
                s.touch();
                removed
            })?;
            info!("Removed '{}' from queue in chat {}", removed.title, chat_id);
            return Ok(removed);
        }

        let stream = session.with_mut(|s| s.active_stream.take());
        release_logged(chat_id, stream).await;
        let removed = session.with_mut(|s| s.queue.remove_at(position))?;
        info!("Removed playing track '{}' in chat {}", removed.title, chat_id);

        if self.start_with(&session, |q| q.start_from(position - 1)).await?.is_none() {
            self.queue_finished(chat_id).await;
        }
        Ok(removed)
    }

    /// Moves one queue entry; the playing track keeps playing.
    pub async fn move_track(&self, chat_id: ChatId, from: usize, to: usize) -> Result<(), Error> {
        debug!("move_track() chat={} from={} to={}", chat_id, from, to);
        let session = self.acquire(chat_id, false).await?;
        session.with_mut(|s| -> Result<(), Error> {
            s.queue.reorder(from, to)?;
            s.touch();
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// Natural end of a stream. Only honored when `handle` is the session's
    /// active handle; stale notifications are dropped and return `Ok(false)`.
    pub async fn stream_ended(&self, chat_id: ChatId, handle: StreamHandle) -> Result<bool, Error> {
        let session = match self.acquire(chat_id, false).await {
            Ok(s) => s,
            Err(Error::NoActiveSession(_)) => {
                debug!("Dropping stream end {} for chat {} without session", handle, chat_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if session.with(|s| s.active_handle()) != Some(handle) {
            debug!("Dropping stale stream end {} in chat {}", handle, chat_id);
            return Ok(false);
        }

        info!("Stream {} ended in chat {}", handle, chat_id);
        self.advance(&session).await?;
        Ok(true)
    }

    /// Forced disconnect (kicked, call closed). The handle is already dead so
    /// it is dropped without a detach call. The queue is cleared and the
    /// session removed unless `preserve_queue_on_disconnect` is set.
    pub async fn transport_disconnected(&self, chat_id: ChatId, reason: &str) {
        let session = match self.acquire(chat_id, false).await {
            Ok(s) => s,
            Err(_) => {
                debug!("Disconnect for chat {} without session: {}", chat_id, reason);
                return;
            }
        };

        warn!("Transport disconnected in chat {}: {}", chat_id, reason);
        if let Some(stream) = session.with_mut(|s| s.active_stream.take()) {
            stream.forget();
        }
        self.event_bus
            .publish(PlaybackEvent::TransportDisconnected {
                chat_id,
                reason: reason.to_string(),
            })
            .await;

        if self.config.preserve_queue_on_disconnect {
            session.with_mut(|s| {
                s.queue.reset_cursor();
                s.state = PlayerState::Idle;
                s.touch();
            });
            info!("Kept queue for chat {} after disconnect", chat_id);
            return;
        }

        let leftover = self.store.evict(&session);
        if let Some(stream) = leftover {
            stream.forget();
        }
        self.event_bus
            .publish(PlaybackEvent::SessionClosed {
                chat_id,
                reason: CloseReason::Disconnected,
            })
            .await;
    }

    // ------------------------------------------------------------------
    // Queries (no command gate)
    // ------------------------------------------------------------------

    pub fn get_queue(&self, chat_id: ChatId) -> Vec<Track> {
        self.store
            .get(chat_id)
            .map(|slot| slot.with(|s| s.queue.tracks().to_vec()))
            .unwrap_or_default()
    }

    pub fn get_current(&self, chat_id: ChatId) -> Option<Track> {
        self.store.get(chat_id).and_then(|slot| slot.with(|s| s.current_track()))
    }

    /// 1-based position of the playing entry.
    pub fn get_current_position(&self, chat_id: ChatId) -> Option<usize> {
        self.store
            .get(chat_id)
            .and_then(|slot| slot.with(|s| s.queue.current_position()))
    }

    /// What plays after the current track, if anything.
    pub fn get_next(&self, chat_id: ChatId) -> Option<Track> {
        self.store
            .get(chat_id)
            .and_then(|slot| slot.with(|s| s.queue.peek_next().cloned()))
    }

    pub fn get_state(&self, chat_id: ChatId) -> PlayerState {
        self.store
            .get(chat_id)
            .map(|slot| slot.with(|s| s.state))
            .unwrap_or_default()
    }

    pub fn get_history(&self, chat_id: ChatId) -> Vec<Track> {
        self.store
            .get(chat_id)
            .map(|slot| slot.with(|s| s.queue.history()))
            .unwrap_or_default()
    }

    pub fn get_volume(&self, chat_id: ChatId) -> Option<Volume> {
        self.store.get(chat_id).map(|slot| slot.with(|s| s.volume))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Takes the chat's command gate. A slot that was closed while we waited
    /// has been replaced (or removed), so the lookup is retried.
    async fn acquire(&self, chat_id: ChatId, create: bool) -> Result<LockedSession, Error> {
        loop {
            let slot = if create {
                self.store.get_or_create(chat_id)
            } else {
                self.store.get(chat_id).ok_or(Error::NoActiveSession(chat_id))?
            };
            let session = slot.lock().await;
            if slot.is_closed() {
                continue;
            }
            return Ok(session);
        }
    }

    async fn resolve_and_enqueue(
        &self,
        session: &LockedSession,
        query: &str,
        requested_by: Option<UserId>,
    ) -> Result<(usize, Track), Error> {
        let track = self.resolver.resolve(query, requested_by).await?;
        if track.duration > self.config.duration_limit {
            warn!(
                "Rejecting '{}' ({}s) in chat {}: over duration limit",
                track.title,
                track.duration.as_secs(),
                session.chat_id()
            );
            return Err(Error::TrackTooLong {
                title: track.title,
                limit_minutes: self.config.duration_limit_minutes(),
            });
        }
        let position = session.with_mut(|s| {
            let position = s.queue.enqueue(track.clone());
            s.touch();
            position
        })?;
        info!(
            "Queued '{}' at position {} in chat {}",
            track.display_name(),
            position,
            session.chat_id()
        );
        Ok((position, track))
    }

    async fn resume_locked(&self, session: &LockedSession) -> Result<(), Error> {
        let chat_id = session.chat_id();
        match session.with(|s| s.state) {
            PlayerState::Paused => {}
            PlayerState::Playing => return Err(Error::AlreadyPlaying),
            _ => return Err(Error::NoActiveSession(chat_id)),
        }
        let handle = self.require_handle(session)?;

        self.transport.resume(handle).await.map_err(as_transport_error)?;
        session.with_mut(|s| {
            s.state = PlayerState::Playing;
            s.touch();
        });
        info!("Resumed playback in chat {}", chat_id);
        self.event_bus.publish(PlaybackEvent::PlaybackResumed { chat_id }).await;
        Ok(())
    }

    /// Releases the current stream, retires its entry and starts the next one.
    async fn advance(&self, session: &LockedSession) -> Result<Option<Track>, Error> {
        let chat_id = session.chat_id();
        let stream = session.with_mut(|s| s.active_stream.take());
        release_logged(chat_id, stream).await;

        if let Some(upcoming) = session.with(|s| s.queue.peek_next().cloned()) {
            debug!("Advancing chat {} to '{}'", chat_id, upcoming.title);
        }
        let next = self.start_with(session, |q| q.advance()).await?;
        if next.is_none() {
            self.queue_finished(chat_id).await;
        }
        Ok(next)
    }

    /// Moves the cursor with `pick` and attaches the entry it lands on at the
    /// session volume.
    ///
    /// `Ok(None)` when `pick` finds nothing (session goes Idle). On attach
    /// failure the session is Idle with the cursor unloaded and the entry
    /// still queued.
    async fn start_with<F>(&self, session: &LockedSession, pick: F) -> Result<Option<Track>, Error>
    where
        F: FnOnce(&mut TrackQueue) -> Option<Track>,
    {
        let chat_id = session.chat_id();
        let picked = session.with_mut(|s| {
            let picked = pick(&mut s.queue).map(|track| (track, s.volume));
            if picked.is_none() {
                s.state = PlayerState::Idle;
            }
            s.touch();
            picked
        });
        let Some((track, volume)) = picked else {
            return Ok(None);
        };

        match self.transport.attach(chat_id, &track.source_uri, volume).await {
            Ok(handle) => {
                let stream = ActiveStream::new(handle, self.transport.clone());
                session.with_mut(|s| {
                    s.active_stream = Some(stream);
                    s.state = PlayerState::Playing;
                    s.touch();
                });
                info!("Now playing '{}' in chat {} (handle {})", track.display_name(), chat_id, handle);
                self.event_bus
                    .publish(PlaybackEvent::TrackStarted {
                        chat_id,
                        track: track.clone(),
                        handle,
                        timestamp: Utc::now(),
                    })
                    .await;
                Ok(Some(track))
            }
            Err(e) => {
                error!("Failed to attach '{}' in chat {}: {:?}", track.title, chat_id, e);
                session.with_mut(|s| {
                    s.queue.reset_cursor();
                    s.state = PlayerState::Idle;
                });
                Err(match e {
                    Error::Attach(reason) => Error::Attach(reason),
                    other => Error::Attach(other.to_string()),
                })
            }
        }
    }

    async fn queue_finished(&self, chat_id: ChatId) {
        info!("Queue finished in chat {}", chat_id);
        self.event_bus.publish(PlaybackEvent::QueueFinished { chat_id }).await;
    }

    fn require_handle(&self, session: &LockedSession) -> Result<StreamHandle, Error> {
        session
            .with(|s| s.active_handle())
            .ok_or(Error::NoActiveSession(session.chat_id()))
    }
}

fn as_transport_error(e: Error) -> Error {
    match e {
        Error::Transport(_) => e,
        other => Error::Transport(other.to_string()),
    }
}
