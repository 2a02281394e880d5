//! Fixed-window page segmenter.
//!
//! Splits a page's OCR text into fixed-length character windows with a
//! fixed overlap. The policy is deterministic: the same text under the same
//! window/overlap always yields a byte-identical sequence of
//! [`SegmentDraft`]s, which is what makes re-ingestion idempotent.
//!
//! Each draft carries a SHA-256 hash of the whitespace-collapsed window
//! text, so incidental formatting differences do not change segment
//! identity. The segmenter is pure; it never touches storage.

use sha2::{Digest, Sha256};

/// A segment candidate produced from a page's OCR text, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDraft {
    pub index: i64,
    pub text: String,
    pub hash: String,
}

/// Split OCR text into overlapping character windows.
///
/// Empty text yields no segments; text shorter than one window yields
/// exactly one. Windows are counted in characters, not bytes, so splits
/// never land inside a UTF-8 sequence.
pub fn segment_text(text: &str, window_chars: usize, overlap_chars: usize) -> Vec<SegmentDraft> {
    debug_assert!(window_chars > 0);
    debug_assert!(overlap_chars < window_chars);

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = window_chars - overlap_chars;

    let mut drafts = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let end = (start + window_chars).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        drafts.push(SegmentDraft {
            index,
            hash: content_hash(&window),
            text: window,
        });

        if end == chars.len() {
            break;
        }
        start += step;
        index += 1;
    }

    drafts
}

/// SHA-256 over the whitespace-collapsed form of the text, hex-encoded.
pub fn content_hash(text: &str) -> String {
    let normalized = normalize(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_no_segments() {
        let drafts = segment_text("", 800, 100);
        assert!(drafts.is_empty());
    }

    #[test]
    fn test_short_text_single_segment() {
        let drafts = segment_text("Hello, world!", 800, 100);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].index, 0);
        assert_eq!(drafts[0].text, "Hello, world!");
    }

    #[test]
    fn test_900_chars_two_windows() {
        let text = "A".repeat(900);
        let drafts = segment_text(&text, 800, 100);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].index, 0);
        assert_eq!(drafts[1].index, 1);
        assert_eq!(drafts[0].text.chars().count(), 800);
        // Second window starts at 700 and runs to the end
        assert_eq!(drafts[1].text.chars().count(), 200);
    }

    #[test]
    fn test_exact_window_length_single_segment() {
        let text = "B".repeat(800);
        let drafts = segment_text(&text, 800, 100);
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let a = segment_text(&text, 800, 100);
        let b = segment_text(&text, 800, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_overlap_between_windows() {
        let text: String = ('a'..='z').cycle().take(1000).collect();
        let drafts = segment_text(&text, 800, 100);
        assert_eq!(drafts.len(), 2);
        let tail: String = drafts[0].text.chars().skip(700).collect();
        let head: String = drafts[1].text.chars().take(100).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn test_hash_ignores_incidental_whitespace() {
        assert_eq!(content_hash("civic  election\nresults"), content_hash("civic election results"));
        assert_ne!(content_hash("civic election"), content_hash("civic electors"));
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "å".repeat(900);
        let drafts = segment_text(&text, 800, 100);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].text.chars().count(), 200);
    }
}
