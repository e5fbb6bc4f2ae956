// File: tunebot-common/src/models/playback.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::track::{ChatId, Track};

/// Player state machine of a single chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    /// No track loaded. The queue may still hold pending entries.
    #[default]
    Idle,
    Playing,
    Paused,
    /// Transient while the transport handle is being released.
    Stopping,
}

impl PlayerState {
    /// Playing or Paused, i.e. a stream is attached.
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Paused)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerState::Idle => "idle",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopping => "stopping",
        };
        write!(f, "{}", s)
    }
}

/// Opaque reference to an attached stream, minted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle(Uuid);

impl StreamHandle {
    pub fn new() -> Self {
        StreamHandle(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output level in percent, 0..=200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Volume(u8);

impl Volume {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 200;
    pub const DEFAULT: Volume = Volume(100);

    /// Validates a user-supplied level. Out-of-range values are rejected, not clamped.
    pub fn new(level: i64) -> Result<Self, Error> {
        if level < Self::MIN as i64 || level > Self::MAX as i64 {
            return Err(Error::InvalidVolume(level));
        }
        Ok(Volume(level as u8))
    }

    pub fn level(&self) -> u8 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Volume::DEFAULT
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Result of a successful `play` command.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    /// A stream was attached for this track.
    Started { track: Track, position: usize },
    /// Something is already playing; the track was appended to the queue.
    Queued { track: Track, position: usize },
    /// Play without a query on a paused session resumed it.
    Resumed,
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Stopped,
    Disconnected,
    IdleTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Stopped => "stopped",
            CloseReason::Disconnected => "disconnected",
            CloseReason::IdleTimeout => "idle_timeout",
        };
        write!(f, "{}", s)
    }
}

/// Asynchronous notifications emitted by a `StreamTransport`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A track finished naturally.
    StreamEnded { chat_id: ChatId, handle: StreamHandle },
    /// The bot was removed from the voice channel or the call was closed.
    Disconnected { chat_id: ChatId, reason: String },
}

impl TransportEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            TransportEvent::StreamEnded { chat_id, .. } => *chat_id,
            TransportEvent::Disconnected { chat_id, .. } => *chat_id,
        }
    }
}
