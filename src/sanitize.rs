//! Turns free text (event and photographer names) into a single safe path segment.

/// Longest name most destination filesystems accept, in UTF-16 code units.
pub const MAX_SEGMENT_LEN: usize = 255;

pub const UNTITLED: &str = "Untitled";

const INVALID_CHARS: [char; 4] = ['/', '\\', ':', '\0'];

/// Never fails: every input maps to a non-empty segment that is not hidden,
/// contains no separators and fits in [`MAX_SEGMENT_LEN`].
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '-' } else { c })
        .collect();

    let mut sanitized = replaced.trim().to_string();
    if sanitized.starts_with('.') {
        sanitized.insert(0, '_');
    }

    let truncated = truncate_utf16(&sanitized, MAX_SEGMENT_LEN).trim_end();
    if truncated.is_empty() {
        UNTITLED.to_string()
    } else {
        truncated.to_string()
    }
}

fn truncate_utf16(s: &str, max_units: usize) -> &str {
    let mut units = 0;
    for (idx, c) in s.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return &s[..idx];
        }
    }
    s
}
