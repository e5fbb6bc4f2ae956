// File: src/platforms/mod.rs
//
// In-process stand-ins for the voice-call transport and the music catalogue,
// used by the server binary when no real platform integration is wired.

pub mod catalog;
pub mod loopback;

pub use catalog::{Catalog, CatalogEntry, CatalogResolver};
pub use loopback::LoopbackTransport;
