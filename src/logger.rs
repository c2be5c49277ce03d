//! Logging setup for the appliance.
//!
//! One call to [`init`] at startup, after the effective level has been
//! resolved (`-v` flags win over `DOGPHONE_LOG_LEVEL`, which wins over the
//! config file). `RUST_LOG` still works for targeted directives like
//! `RUST_LOG=dogphone::dispatcher=trace` and, when set, replaces the
//! resolved level entirely.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// HTTP/TLS plumbing under the Telegram client is chatty at `debug`; on a
/// device log it drowns out everything the owner actually cares about.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "rustls", "h2", "tower"];

/// Install the global tracing subscriber, writing to stderr.
///
/// The filter is the resolved `level` for this crate with third-party
/// networking targets capped at `warn`, unless `RUST_LOG` is set, in which
/// case its directives are used verbatim.
pub fn init(level: &str) -> Result<(), AppError> {
    // Validate before building directives so a typo in the config file
    // reads as "bad log level", not as a cryptic directive-parse error.
    parse_level(level)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => {
            let mut directives = level.to_string();
            for target in QUIET_TARGETS {
                directives.push_str(&format!(",{target}=warn"));
            }
            EnvFilter::try_new(&directives)
                .map_err(|e| AppError::Logger(format!("bad filter '{directives}': {e}")))?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Validate a level string from config or env, rejecting anything that is
/// not a plain `error`/`warn`/`info`/`debug`/`trace`.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_levels_are_accepted() {
        for l in &["error", "warn", "info", "debug", "trace"] {
            assert!(parse_level(l).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn garbage_levels_are_rejected() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn init_rejects_bad_level_before_touching_the_subscriber() {
        let err = init("chatty").unwrap_err();
        assert!(err.to_string().contains("chatty"));
    }

    #[test]
    fn init_with_valid_level() {
        // A prior test in this process may already have installed a
        // subscriber; both outcomes are acceptable.
        match init("info") {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
