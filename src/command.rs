//! Chat command routing — inbound text to a command token.
//!
//! Case-insensitive exact match on a small enumerated set plus the bare
//! word "cookie". No partial or fuzzy matching: a dog-adjacent household
//! chat should never trigger the dispenser by accident.

/// A parsed chat command. `Unrecognized` messages are dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `/start` — informational help reply, no state mutation.
    Start,
    /// `/cookie` or bare `cookie` — dispense a treat.
    Cookie,
    /// `/version` — informational version reply.
    Version,
    /// `/update` — run the self-update.
    Update,
    Unrecognized,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "/start" => Self::Start,
            "/cookie" | "cookie" => Self::Cookie,
            "/version" => Self::Version,
            "/update" => Self::Update,
            _ => Self::Unrecognized,
        }
    }
}
