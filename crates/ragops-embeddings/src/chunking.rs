//! Character-window chunking.
//!
//! Windows are measured in characters, not bytes, so multi-byte text never
//! splits inside a code point.

/// Chunk window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            overlap: 80,
        }
    }
}

/// Split text into overlapping windows.
///
/// The text is trimmed and CRLF line endings normalized first. Text no
/// longer than one window yields exactly one chunk (possibly empty).
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let normalized = text.trim().replace("\r\n", "\n");
    let chars: Vec<char> = normalized.chars().collect();
    let size = config.chunk_size.max(1);

    if chars.len() <= size {
        return vec![normalized];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        let next = end.saturating_sub(config.overlap);
        // overlap >= chunk_size would never advance
        start = if next > start { next } else { end };
    }
    chunks
}

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn digits(n: usize) -> String {
        (0..n)
            .map(|i| char::from(b'0' + (i % 10) as u8))
            .collect()
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunk_text("  hello world \r\n", &ChunkConfig::default());
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_one_empty_chunk() {
        assert_eq!(chunk_text("   ", &ChunkConfig::default()), vec![String::new()]);
    }

    #[test]
    fn test_windows_overlap() {
        let text = digits(1000);
        let chunks = chunk_text(&text, &ChunkConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 600);
        assert_eq!(chunks[1].chars().count(), 480);
        assert_eq!(&chunks[0][520..], &chunks[1][..80]);
        assert!(text.ends_with(&chunks[1]));
    }

    #[test]
    fn test_exact_window_multiple() {
        // 600 + 520 = 1120 characters lands exactly on a window boundary
        let chunks = chunk_text(&digits(1120), &ChunkConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chars().count(), 600);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text: String = "é".repeat(700);
        let chunks = chunk_text(&text, &ChunkConfig::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 600);
        assert_eq!(chunks[1].chars().count(), 180);
    }

    #[test]
    fn test_overlap_larger_than_window_still_terminates() {
        let config = ChunkConfig {
            chunk_size: 10,
            overlap: 50,
        };
        let chunks = chunk_text(&digits(25), &config);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 10), "ab");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }
}
