//! src/playback/mod.rs
//!
//! Per-chat playback core: the queue, the session record with its guards,
//! the process-wide session store and the controller state machine.

pub mod controller;
pub mod queue;
pub mod session;
pub mod store;

pub use controller::PlaybackController;
pub use queue::TrackQueue;
pub use session::{ActiveStream, LockedSession, PlaybackSession, SessionSlot};
pub use store::{SessionDefaults, SessionStore};
