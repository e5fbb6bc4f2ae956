use async_trait::async_trait;

use crate::error::Error;
use crate::models::{ChatId, StreamHandle, Track, UserId, Volume};

/// Maps a free-text query or URL to a playable track.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Returns `Error::TrackNotFound` when nothing matches.
    async fn resolve(&self, query: &str, requested_by: Option<UserId>) -> Result<Track, Error>;
}

/// Attaches audio to a chat's voice channel.
///
/// Handles are owned by the transport and only borrowed by the session that
/// attached them. End-of-stream and disconnects are reported out of band as
/// `TransportEvent`s.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn attach(
        &self,
        chat_id: ChatId,
        source_uri: &str,
        volume: Volume,
    ) -> Result<StreamHandle, Error>;

    /// Idempotent: detaching an unknown or already-ended handle succeeds.
    async fn detach(&self, handle: StreamHandle) -> Result<(), Error>;

    async fn pause(&self, handle: StreamHandle) -> Result<(), Error>;

    async fn resume(&self, handle: StreamHandle) -> Result<(), Error>;

    async fn set_volume(&self, handle: StreamHandle, volume: Volume) -> Result<(), Error>;
}
