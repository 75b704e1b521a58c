use async_trait::async_trait;

use crate::Result;

/// Post text to a channel or privately to a user.
///
/// Callers treat every send as best-effort: an error is logged by the caller
/// and never retried.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn post_to_channel(&self, channel_id: &str, text: &str) -> Result<()>;
    async fn direct_message(&self, user_id: &str, text: &str) -> Result<()>;
}

/// Split text into chunks of at most `max_len` bytes, preferring newline and
/// then space boundaries so words stay whole.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window = max_len;
        while window > 0 && !remaining.is_char_boundary(window) {
            window -= 1;
        }
        if window == 0 {
            // A single char wider than the limit still has to go somewhere.
            window = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }

        let slice = &remaining[..window];
        let split_at = match slice.rfind('\n').or_else(|| slice.rfind(' ')) {
            Some(0) | None => window,
            Some(at) => at,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches(['\n', ' ']);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_message("hello", 2000), vec!["hello"]);
        assert!(chunk_message("hello", 0).is_empty());
    }

    #[test]
    fn prefers_newline_boundaries() {
        let text = format!("{}\n{}", "a".repeat(15), "b".repeat(15));
        assert_eq!(chunk_message(&text, 20), vec!["a".repeat(15), "b".repeat(15)]);
    }

    #[rstest]
    #[case::spaces("word ".repeat(1_000), 2000)]
    #[case::no_breaks("x".repeat(4_500), 2000)]
    #[case::multibyte("é".repeat(3_000), 2000)]
    fn chunks_respect_limit(#[case] text: String, #[case] limit: usize) {
        let chunks = chunk_message(&text, limit);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= limit && !c.is_empty()));
    }

    #[test]
    fn utf8_boundary_is_respected() {
        let text = format!("{}лz", "a".repeat(1999));
        let chunks = chunk_message(&text, 2000);
        assert_eq!(chunks, vec!["a".repeat(1999), "лz".to_string()]);
    }
}
