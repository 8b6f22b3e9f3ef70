//! Small shared helpers.

/// Split a `KEY=VALUE` entry on the first `=`.
///
/// The value keeps its bytes verbatim: empty values, whitespace, embedded
/// `=`, and newlines all survive. Returns `None` when the entry has no `=`
/// at all or the key is empty.
pub fn split_key_value(entry: &str) -> Option<(&str, &str)> {
    let idx = entry.find('=')?;
    let (key, rest) = entry.split_at(idx);
    if key.is_empty() {
        return None;
    }
    Some((key, &rest[1..]))
}

/// Largest index `<= max` that is a UTF-8 character boundary of `s`.
pub fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
