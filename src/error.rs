//! Application-wide error types.
//!
//! Only `Config` is fatal, and only at startup. Everything else is carried
//! as a value back to whichever event source asked for the action; the
//! dispatcher logs it and keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    /// Event-source failure (telegram channel, http listener, button feed).
    #[error("source error: {0}")]
    Source(String),

    #[error("actuator error: {0}")]
    Actuator(String),

    #[error("notification error: {0}")]
    Notify(String),

    /// Browser / viewer launch failed; the message carries the URL so the
    /// caller can surface it for manual use.
    #[error("launch error: {0}")]
    Launch(String),

    #[error("update error: {0}")]
    Update(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
