// File: tunebot-common/src/traits/mod.rs
pub mod playback_traits;

pub use playback_traits::{StreamTransport, TrackResolver};

#[cfg(feature = "mocks")]
pub use playback_traits::{MockStreamTransport, MockTrackResolver};
