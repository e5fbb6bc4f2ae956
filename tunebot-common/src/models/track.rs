// File: tunebot-common/src/models/track.rs

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a group chat. One playback session exists per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        ChatId(id)
    }
}

/// Platform user id of whoever requested a track.
pub type UserId = i64;

/// Immutable descriptor of a playable track, as produced by a `TrackResolver`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub duration: Duration,
    pub source_uri: String,
    pub requested_by: Option<UserId>,
    pub requested_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        duration: Duration,
        source_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            artist: artist.into(),
            duration,
            source_uri: source_uri.into(),
            requested_by: None,
            requested_at: Utc::now(),
        }
    }

    /// Builder-style setter for the requesting user.
    pub fn requested_by(mut self, user_id: Option<UserId>) -> Self {
        self.requested_by = user_id;
        self
    }

    /// "Title by Artist"
    pub fn display_name(&self) -> String {
        format!("{} by {}", self.title, self.artist)
    }

    /// Duration as `m:ss`.
    pub fn formatted_duration(&self) -> String {
        let secs = self.duration.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}
