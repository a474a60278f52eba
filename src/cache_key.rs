//! Cache key construction and glob matching
//!
//! Keys are built as `prefix:segment:segment...`. Segments are normalized so
//! that distinct identifier tuples can never collide and can never smuggle
//! wildcard characters into a pattern delete:
//!
//! - empty segments are skipped
//! - `%`, `:`, `*`, `?` and whitespace inside a segment are percent-escaped,
//!   so `" a.mp4"` and `"a.mp4"` stay distinct

/// Separator between key segments
pub const KEY_SEPARATOR: char = ':';

/// Build a deterministic cache key from a fixed prefix and identifier segments
///
/// Pure function, no I/O. Two calls with the same `(prefix, identifiers)`
/// always return the same key.
///
/// # Example
/// ```
/// use media_stream::cache_key::generate_key;
///
/// assert_eq!(generate_key("media:metadata", &["videos", "a.mp4"]), "media:metadata:videos:a.mp4");
/// assert_eq!(generate_key("k", &["a:b"]), "k:a%3Ab");
/// ```
pub fn generate_key<S: AsRef<str>>(prefix: &str, identifiers: &[S]) -> String {
    let mut key = prefix.trim().trim_end_matches(KEY_SEPARATOR).to_string();

    for id in identifiers {
        let segment = id.as_ref();
        if segment.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push(KEY_SEPARATOR);
        }
        escape_segment(segment, &mut key);
    }

    key
}

/// Build a glob pattern matching every key below `(prefix, identifiers)`
///
/// `key_pattern("media:metadata", &["videos"])` yields `media:metadata:videos:*`.
pub fn key_pattern<S: AsRef<str>>(prefix: &str, identifiers: &[S]) -> String {
    let mut pattern = generate_key(prefix, identifiers);
    pattern.push(KEY_SEPARATOR);
    pattern.push('*');
    pattern
}

fn escape_segment(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            ws if ws.is_whitespace() => {
                let mut buf = [0u8; 4];
                for byte in ws.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02X}", byte));
                }
            }
            other => out.push(other),
        }
    }
}

/// Match `key` against a glob `pattern`
///
/// Supports `*` (any sequence, including empty) and `?` (exactly one
/// character). Every other character matches itself.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0usize, 0usize);
    // Position of the last `*` seen and the key index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, k));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last `*` swallow one more character
            p = star + 1;
            k = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
