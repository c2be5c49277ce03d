//! DogPhone — a "dog calls owner" appliance.
//!
//! A physical button opens a video call and notifies the owner over
//! Telegram; the owner can send `/cookie` to dispense a treat via a servo.
//! The crate is organised around one event dispatcher actor
//! ([`dispatcher`]) fed by three concurrent sources ([`sources`]), with
//! narrow trait seams toward the outside world: the servo driver
//! ([`actuator`]), the browser launcher ([`launch`]), the notification
//! gateway ([`notify`]) and the self-update/restart pair ([`update`]).
//!
//! The binary entry point is `src/main.rs`; the library root exists so
//! integration tests can drive the dispatcher with test doubles.

pub mod actuator;
pub mod call_url;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod launch;
pub mod logger;
pub mod notify;
pub mod runtime;
pub mod sources;
pub mod update;
