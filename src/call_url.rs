//! Call-link resolution — pure mapping from [`CallConfig`] to the URL the
//! device opens (and the owner receives) for a video call.
//!
//! Priority: an explicitly configured target wins; otherwise a Jitsi room
//! URL is synthesized from the configured room and domain. Deterministic
//! and side-effect free.

use crate::config::CallConfig;

/// Fragment options that skip Jitsi's pre-join page so the device enters
/// the call without manual confirmation.
const JITSI_JOIN_OPTS: &str = "#config.prejoinPageEnabled=false";

/// Resolve the URL to open for a video call, or `None` when neither a
/// target nor a room is configured.
pub fn resolve(call: &CallConfig) -> Option<String> {
    let target = call.target.trim();
    if !target.is_empty() {
        return Some(normalize_target(target, call.credential.trim()));
    }

    let room = call.room.trim();
    if room.is_empty() {
        return None;
    }
    let domain = if call.domain.trim().is_empty() {
        "meet.jit.si"
    } else {
        call.domain.trim()
    };
    Some(format!("https://{domain}/{room}{JITSI_JOIN_OPTS}"))
}

/// Normalize an explicit call target:
/// - bare numeric id (spaces/dashes/NBSP tolerated) → Zoom join-by-id form
/// - missing scheme → `https://` prefix
/// - credential → `pwd=` query parameter, URL-encoded, `?`/`&` as needed
fn normalize_target(target: &str, credential: &str) -> String {
    let compact: String = target
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '\u{a0}'))
        .collect();

    let mut url = if !compact.is_empty() && compact.chars().all(|c| c.is_ascii_digit()) {
        format!("https://zoom.us/j/{compact}")
    } else if !target.starts_with("http://") && !target.starts_with("https://") {
        format!("https://{target}")
    } else {
        target.to_string()
    };

    if !credential.is_empty() {
        let sep = if url.contains('?') { '&' } else { '?' };
        url.push(sep);
        url.push_str("pwd=");
        url.push_str(&urlencoding::encode(credential));
    }
    url
}
