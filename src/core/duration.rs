//! Parsing of human-friendly duration strings.
//!
//! Provider configurations express keep-alive periods as compact strings
//! such as `"30s"`, `"45m"` or `"2h"`. Parsing happens on demand; the
//! catalog stores the original string.

use std::time::Duration;

/// Parse a duration string of the form `<digits><unit>` where the unit is
/// one of `s`, `m`, `h` (case-insensitive, surrounding whitespace allowed).
///
/// Returns `None` for anything else, including empty strings and bare
/// numbers without a unit.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let text = value.trim();
    let (unit_idx, unit) = text.char_indices().last()?;

    let amount_str = text[..unit_idx].trim();
    if amount_str.is_empty() || !amount_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = amount_str.parse().ok()?;

    let secs = match unit.to_ascii_lowercase() {
        's' => amount,
        'm' => amount * 60,
        'h' => amount * 3600,
        _ => return None,
    };

    Some(Duration::from_secs(secs))
}

/// Like [`parse_duration`] but yields whole seconds, the unit used by the
/// keep-alive schedule in the coordination store.
pub fn parse_duration_seconds(value: &str) -> Option<u64> {
    parse_duration(value).map(|d| d.as_secs())
}
