// src/lib.rs

pub mod config;
pub mod eventbus;
pub mod playback;
pub mod platforms;
pub mod services;
pub mod tasks;
pub mod test_utils;

pub use config::BotConfig;
pub use playback::{PlaybackController, SessionStore};
pub use tunebot_common::error::Error;
pub use tunebot_common::models;
