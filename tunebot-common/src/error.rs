// ================================================================
// File: tunebot-common/src/error.rs
// ================================================================

use thiserror::Error;

use crate::models::track::ChatId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Stream attach error: {0}")]
    Attach(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid queue position {position} (queue has {len} entries)")]
    InvalidPosition { position: usize, len: usize },

    #[error("Invalid volume {0}; expected a value between 0 and 200")]
    InvalidVolume(i64),

    #[error("Queue limit of {0} reached")]
    QueueFull(usize),

    #[error("Track '{title}' exceeds the duration limit of {limit_minutes} minutes")]
    TrackTooLong { title: String, limit_minutes: u64 },

    #[error("Playback is already paused")]
    AlreadyPaused,

    #[error("Playback is already running")]
    AlreadyPlaying,

    #[error("Nothing is playing or queued in chat {0}")]
    NoActiveSession(ChatId),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for conditions where the command simply had nothing to do.
    pub fn is_noop(&self) -> bool {
        matches!(self, Error::AlreadyPaused | Error::AlreadyPlaying)
    }
}
