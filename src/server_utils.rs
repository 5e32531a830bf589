use crate::constants::{is_known_sprite, DEFAULT_NAME, MAX_NAME_LEN};

const MAX_PHOTO_URL_LEN: usize = 2048;
const MAX_ATTENDEE_ID_LEN: usize = 128;

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return DEFAULT_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

pub fn normalize_sprite(raw: Option<&str>, fallback: &str) -> String {
    match raw.map(str::trim) {
        Some(name) if is_known_sprite(name) => name.to_string(),
        _ => fallback.to_string(),
    }
}

/// Photo references are stored inside the packed identity, so anything that
/// is not a plain http(s) URL is dropped rather than stored.
pub fn sanitize_photo_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_PHOTO_URL_LEN {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("https://") || lower.starts_with("http://")) {
        return None;
    }
    if trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn parse_coordinate(value: Option<f64>) -> Option<f32> {
    let value = value?;
    if !value.is_finite() || value.abs() > f32::MAX as f64 {
        return None;
    }
    Some(value as f32)
}

/// Ids are opaque store keys; only empty, oversized or control-bearing
/// values are refused.
pub fn is_valid_attendee_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.chars().count() <= MAX_ATTENDEE_ID_LEN
        && !raw.chars().any(char::is_control)
}
