//! Event sources — the three concurrent entry points into the dispatcher.
//!
//! Each source implements [`crate::runtime::EventSource`] and is spawned
//! by [`crate::runtime::spawn_sources`]. Sources only ever talk to the
//! dispatcher through its handle; they never touch device state directly.

pub mod button;
#[cfg(feature = "channel-http")]
pub mod http;
#[cfg(feature = "channel-telegram")]
pub mod telegram;
