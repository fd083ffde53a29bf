//! Text helpers shared by the pattern engine, recognizers and resolver.
//!
//! All offsets are byte offsets into UTF-8 text; the boundary helpers keep
//! slices valid when a span edge lands inside a multi-byte character.

/// Find the nearest valid UTF-8 char boundary at or before the given byte index.
#[inline]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Find the nearest valid UTF-8 char boundary at or after the given byte index.
#[inline]
pub fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Slice between two byte positions, shrinking inward to char boundaries.
#[inline]
pub fn safe_slice(s: &str, start: usize, end: usize) -> &str {
    let safe_start = ceil_char_boundary(s, start);
    let safe_end = floor_char_boundary(s, end);
    if safe_start >= safe_end {
        ""
    } else {
        &s[safe_start..safe_end]
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric words of `s`.
pub fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Share of the words of `needle` that also occur in `haystack`.
///
/// Returns 1.0 for a needle without words.
pub fn word_overlap(needle: &str, haystack: &str) -> f32 {
    let needle_words = words(needle);
    if needle_words.is_empty() {
        return 1.0;
    }
    let haystack_words = words(haystack);
    let found = needle_words
        .iter()
        .filter(|w| haystack_words.contains(w))
        .count();
    found as f32 / needle_words.len() as f32
}

/// The last word ending at or before `index`, lowercased.
pub fn word_before(s: &str, index: usize) -> Option<String> {
    let head = &s[..floor_char_boundary(s, index)];
    head.split(|c: char| !c.is_alphanumeric())
        .rev()
        .find(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}
