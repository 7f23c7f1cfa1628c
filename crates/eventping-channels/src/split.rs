//! Length-limited message splitting and Telegram escaping.

/// Split `text` into chunks of at most `max` bytes, preferring splits on
/// newline, then space boundaries. Never cuts inside a UTF-8 character.
pub fn split_chunks(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > max {
        let mut window_end = max;
        while !remaining.is_char_boundary(window_end) {
            window_end -= 1;
        }
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Escape special characters for Telegram MarkdownV2.
///
/// MarkdownV2 requires escaping: `_ * [ ] ( ) ~ ` # + - = | { } . !` and `>`.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Split `text` so that every chunk, once passed through
/// [`escape_markdown_v2`], is at most `max` bytes. Returns unescaped chunks.
///
/// Escaping at most doubles a chunk, so an oversized chunk is split again
/// at `max / 2`.
pub fn split_for_markdown_v2(text: &str, max: usize) -> Vec<String> {
    split_chunks(text, max)
        .into_iter()
        .flat_map(|chunk| {
            if escape_markdown_v2(&chunk).len() <= max {
                vec![chunk]
            } else {
                split_chunks(&chunk, max / 2)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("Hello, world!", 1950);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn long_text_splits_on_newline() {
        let line = "a".repeat(1000);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text, 1950);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.len() <= 1950, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn very_long_word_still_splits() {
        let text = "x".repeat(9000);
        let chunks = split_chunks(&text, 4090);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.len() <= 4090);
        }
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_char() {
        let text = "📅".repeat(100); // 4 bytes each
        let chunks = split_chunks(&text, 30);
        assert!(chunks.iter().all(|c| c.len() <= 30));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn escaped_chunks_fit_even_when_dense_in_specials() {
        let text = "1.2-3!".repeat(700); // 4200 bytes, half of them escaped
        let chunks = split_for_markdown_v2(&text, 4096);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            let escaped = escape_markdown_v2(c).len();
            assert!(escaped <= 4096, "escaped chunk too large: {escaped}");
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn plain_text_keeps_full_size_chunks() {
        let text = "word ".repeat(1000);
        let chunks = split_for_markdown_v2(&text, 4096);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn escape_markdown_v2_escapes_specials() {
        let escaped = escape_markdown_v2("Hello. World! (test) [link] ~strike~ 10-12");
        for needle in ["\\.", "\\!", "\\(", "\\)", "\\[", "\\]", "\\~", "\\-"] {
            assert!(escaped.contains(needle), "missing {needle} in {escaped}");
        }
    }

    #[test]
    fn escape_markdown_v2_leaves_normal_chars() {
        let input = "Hello world 123 abc";
        assert_eq!(escape_markdown_v2(input), input);
    }
}
