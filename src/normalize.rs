//! Canonicalization of raw values before encryption.
//!
//! Superficially different but semantically identical inputs must map to
//! one canonical string *before* they are ever encrypted — a phone typed as
//! `+7 (911) 141-11-23` has to match a stored `79111411123`. The same
//! function runs on every ingested cell and on every search query; search
//! correctness depends entirely on both sides agreeing.

/// Returns the canonical form of a raw cell or query value.
///
/// - Phone-like input (digits, spaces, parentheses, `+`, `-` only): strip
///   everything but digits; a leading `8` becomes `7` (Russian national
///   dialing convention).
/// - Email-like input (contains `@`): strip `<...>` tag fragments that
///   sloppy source dumps sometimes embed.
/// - Anything else passes through unchanged.
///
/// Idempotent: `normalize_value(normalize_value(x)) == normalize_value(x)`.
pub fn normalize_value(value: &str) -> String {
    if looks_like_phone(value) {
        let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
        if let Some(rest) = digits.strip_prefix('8') {
            return format!("7{}", rest);
        }
        return digits;
    }

    if value.contains('@') {
        return strip_tags(value);
    }

    value.to_string()
}

fn looks_like_phone(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '(' | ')' | '+' | '-'))
        && value.chars().any(|c| c.is_ascii_digit())
}

/// Removes `<...>` substrings. An unclosed `<` drops the rest of the string,
/// matching how embedded markup fragments are usually truncated in dumps.
fn strip_tags(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut depth = 0usize;
    for c in value.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}
