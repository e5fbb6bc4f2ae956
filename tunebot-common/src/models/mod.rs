// File: tunebot-common/src/models/mod.rs
pub mod track;
pub mod playback;

pub use track::{ChatId, Track, UserId};
pub use playback::{
    CloseReason, PlayOutcome, PlayerState, StreamHandle, TransportEvent, Volume,
};
