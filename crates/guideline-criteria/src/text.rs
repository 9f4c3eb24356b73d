//! Word-level text helpers shared by the extractor, compiler and matcher.
//!
//! All matching here is word-bounded: a term only matches when the
//! characters on either side of it are not alphanumeric. Callers pass
//! lowercase haystacks and needles.

/// Normalizes criterion text into a lookup key: trimmed, lowercase,
/// single-spaced.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Converts a free-text name into `snake_case` (`"Heart Rate"` → `heart_rate`).
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Finds the byte offset of the first word-bounded occurrence of `needle`.
pub fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    find_word_from(haystack, needle, 0)
}

/// Like [`find_word`], starting the search at byte offset `from`.
pub fn find_word_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .match_indices(needle)
        .map(|(i, _)| i + from)
        .find(|&start| is_word_bounded(haystack, start, start + needle.len()))
}

/// Returns true if `needle` occurs in `haystack` as whole words.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    find_word(haystack, needle).is_some()
}

fn is_word_bounded(haystack: &str, start: usize, end: usize) -> bool {
    let before = haystack[..start].chars().next_back();
    let after = haystack[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

/// Splits text into lowercase alphanumeric tokens.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Returns the byte length of the clause at the start of `text`: everything
/// up to the first `,` `;` `:` or parenthesis, or a `.` that ends a sentence
/// (so decimal points like `38.3` do not end the clause).
pub fn clause_len(text: &str) -> usize {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            ',' | ';' | ':' | '(' | ')' => return i,
            '.' => {
                let next = chars.peek().map(|&(_, n)| n);
                if !next.is_some_and(|n| n.is_ascii_digit()) {
                    return i;
                }
            }
            _ => {}
        }
    }
    text.len()
}
