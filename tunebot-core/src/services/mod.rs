// File: src/services/mod.rs

pub mod transport_event_service;

pub use transport_event_service::{spawn_transport_event_task, TransportEventService};
