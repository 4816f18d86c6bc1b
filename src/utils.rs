use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

/// Safely truncate a string, ensuring it is not truncated in the middle of multi-byte characters
///
/// The output's display width never exceeds `max_width`; an ellipsis is appended when
/// anything was cut.
pub fn truncate_str(s: &str, max_width: usize) -> String {
    use unicode_width::UnicodeWidthStr;

    if s.width() <= max_width {
        return s.to_string();
    }

    let mut result = String::new();
    let mut current_width = 0;

    for c in s.chars() {
        let char_width = c.width().unwrap_or(1);

        if current_width + char_width + 3 > max_width {
            break;
        }

        result.push(c);
        current_width += char_width;
    }

    result.push_str("...");
    result
}

/// Percent-decodes `s` once. Invalid UTF-8 after decoding leaves the input untouched.
pub fn decode_once(s: &str) -> Cow<'_, str> {
    urlencoding::decode(s).unwrap_or(Cow::Borrowed(s))
}

/// Returns `s` followed by each successive decoding of it, stopping at a fixed point or
/// after `max_layers` decodes.
pub fn decode_layers(s: &str, max_layers: usize) -> Vec<String> {
    let mut layers = vec![s.to_string()];
    for _ in 0..max_layers {
        let Some(last) = layers.last() else { break };
        let next = decode_once(last).into_owned();
        if &next == last {
            break;
        }
        layers.push(next);
    }
    layers
}

/// Lowercases a host and strips a trailing root dot.
pub fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// True when `host` is `domain` itself or one of its subdomains.
pub fn host_within(host: &str, domain: &str) -> bool {
    let host = normalize_host(host);
    let domain = normalize_host(domain);
    host == domain || host.ends_with(&format!(".{domain}"))
}
