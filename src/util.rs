//! Shared utility helpers.

/// Case-insensitive substring search without allocating an uppercase copy.
#[inline]
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    find_ci(haystack, needle).is_some()
}

/// Case-insensitive find: byte offset of first occurrence of `needle` in `haystack`.
#[inline]
pub fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let needle_bytes = needle.as_bytes();
    let haystack_bytes = haystack.as_bytes();
    if needle_bytes.is_empty() || needle_bytes.len() > haystack_bytes.len() {
        return None;
    }
    haystack_bytes
        .windows(needle_bytes.len())
        .position(|window| window.eq_ignore_ascii_case(needle_bytes))
}

/// Characters that continue a T-SQL identifier (`@var`, `#temp`, `$action`).
#[inline]
pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'@' | b'#' | b'$')
}

/// Byte offsets of every case-insensitive occurrence of `needle` that is not
/// glued to surrounding identifier characters.
///
/// Unlike a regex `\b`, this treats `@` and `#` as identifier characters, so
/// `@Id` does not match inside `@IdList` and `#T` does not match inside `##T`.
pub fn find_word_ci(haystack: &str, needle: &str) -> Vec<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    let mut hits = Vec::new();
    if pat.is_empty() || pat.len() > hay.len() {
        return hits;
    }

    let mut i = 0;
    while i + pat.len() <= hay.len() {
        if hay[i..i + pat.len()].eq_ignore_ascii_case(pat) {
            let before_ok = i == 0 || !is_ident_byte(hay[i - 1]) || !is_ident_byte(pat[0]);
            let end = i + pat.len();
            let after_ok =
                end == hay.len() || !is_ident_byte(hay[end]) || !is_ident_byte(pat[pat.len() - 1]);
            if before_ok && after_ok {
                hits.push(i);
                i = end;
                continue;
            }
        }
        i += 1;
    }
    hits
}

/// Whether `needle` occurs in `haystack` as a whole word (see [`find_word_ci`]).
#[inline]
pub fn contains_word_ci(haystack: &str, needle: &str) -> bool {
    !find_word_ci(haystack, needle).is_empty()
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to `max` characters, appending `...` when anything was cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Clamp a byte offset down to the nearest char boundary.
pub fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Clamp a byte offset up to the nearest char boundary.
pub fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Text surrounding `[start, end)`, widened by `before` bytes to the left and
/// `after` bytes to the right, clamped to char boundaries.
pub fn context_window(text: &str, start: usize, end: usize, before: usize, after: usize) -> &str {
    let from = floor_char_boundary(text, start.saturating_sub(before));
    let to = ceil_char_boundary(text, end.saturating_add(after));
    &text[from..to]
}

/// `order_items` / `dbo.Orders` / `#Temp` → `OrderItems` / `Orders` / `Temp`.
pub fn pascal_case_entity(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Push `value` unless an equal element is already present.
pub fn push_unique<T: PartialEq>(items: &mut Vec<T>, value: T) {
    if !items.contains(&value) {
        items.push(value);
    }
}
