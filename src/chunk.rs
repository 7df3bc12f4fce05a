//! Reply chunking: split outgoing text into platform-sized pieces at
//! whitespace boundaries, never mid-word when avoidable.

/// Split `text` into chunks of at most `max_len` characters.
///
/// Each chunk is a contiguous slice of the original with the boundary
/// whitespace trimmed away, so rejoining chunks with single separators
/// reproduces the source modulo the whitespace consumed at each split point.
/// A single word longer than `max_len` is hard-split as a last resort.
pub fn split_reply(text: &str, max_len: usize) -> Vec<String> {
    assert!(max_len > 0, "chunk limit must be positive");

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_len {
        let window_end = byte_index_of_char(remaining, max_len);
        let window = &remaining[..window_end];

        // Prefer the last whitespace in the window; fall back to the first
        // whitespace after it, then to a hard split.
        let split_at = window
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .next_back();

        match split_at {
            Some(idx) if idx > 0 => {
                chunks.push(remaining[..idx].trim_end().to_string());
                remaining = remaining[idx..].trim_start();
            }
            _ => {
                // One unbroken word wider than the limit.
                chunks.push(window.to_string());
                remaining = remaining[window_end..].trim_start();
            }
        }
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

/// Byte offset of the `n`th character, or the text length if shorter.
fn byte_index_of_char(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_reply("hello there", 100), vec!["hello there"]);
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert!(split_reply("", 10).is_empty());
        assert!(split_reply("   \n  ", 10).is_empty());
    }

    #[test]
    fn splits_at_whitespace_never_mid_word() {
        let chunks = split_reply("alpha beta gamma delta", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 11);
        }
    }

    #[test]
    fn every_chunk_is_a_slice_of_the_source_in_order() {
        let source = "the quick brown fox jumps over the lazy dog and keeps on running";
        let chunks = split_reply(source, 16);

        let mut cursor = 0;
        for chunk in &chunks {
            let found = source[cursor..]
                .find(chunk.as_str())
                .expect("chunk must appear in the source after the previous one");
            cursor += found + chunk.len();
        }
    }

    #[test]
    fn rejoining_single_spaced_text_round_trips() {
        let source = "one two three four five six seven eight nine ten";
        let chunks = split_reply(source, 14);
        assert_eq!(chunks.join(" "), source);
    }

    #[test]
    fn oversized_word_is_hard_split() {
        let source = "aaaaaaaaaaaaaaaaaaaa tail";
        let chunks = split_reply(source, 8);
        assert!(chunks.iter().all(|c| c.chars().count() <= 8));
        assert_eq!(chunks.concat().replace(' ', ""), source.replace(' ', ""));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let source = "héllo wörld ünïcode tëxt splitting";
        let chunks = split_reply(source, 12);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.join(" "), source);
    }
}
