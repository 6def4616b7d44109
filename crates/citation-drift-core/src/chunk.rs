//! Sentence-aligned page chunker.
//!
//! Splits the extracted text of one page into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Splitting happens on sentence
//! boundaries so a chunk never ends mid-sentence unless a single sentence
//! is larger than the whole budget.
//!
//! Chunk ids are `<file_id>_<page_no>_<chunk_idx>` with `chunk_idx`
//! counting from 0 within each page, so re-chunking unchanged text with
//! the same `max_tokens` reproduces the same ids.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Collapse all whitespace runs to single spaces.
//! 3. Split into sentences at `.`, `!` or `?` (plus any closing quotes or
//!    brackets) followed by whitespace.
//! 4. Accumulate sentences into a buffer until adding the next one would
//!    exceed `max_chars`, then flush the buffer as a chunk.
//! 5. A sentence longer than `max_chars` is hard-split at the last space
//!    before the limit.
//! 6. A page with no text yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use citation_drift_core::chunk::chunk_page;
//!
//! let chunks = chunk_page("doc1", "doc1.pdf", 1, "Hello world. Second sentence.", 400);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_id, "doc1_1_0");
//! ```

use crate::ident::chunk_id;
use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201d}', '\u{2019}'];

/// Split text into sentences.
///
/// Boundaries are sentence-final punctuation followed by whitespace (or
/// end of input). Returned slices are trimmed and never empty.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = None;
        while let Some(&(i, next)) = chars.peek() {
            if CLOSERS.contains(&next) || matches!(next, '.' | '!' | '?') {
                chars.next();
                continue;
            }
            if next.is_whitespace() {
                end = Some(i);
            }
            break;
        }
        let end = match end {
            Some(e) => e,
            None if chars.peek().is_none() => text.len(),
            None => continue,
        };
        let piece = text[start..end].trim();
        if !piece.is_empty() {
            sentences.push(piece);
        }
        start = end;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Chunk one page of a document.
///
/// # Arguments
///
/// * `file_id`: Normalized file id (see [`crate::ident::file_id_for`]).
/// * `source_file`: Corpus-relative path recorded on each chunk.
/// * `page_no`: Page number (`0` for un-paginated formats).
/// * `text`: Extracted page text.
/// * `max_tokens`: Maximum tokens per chunk (converted to chars via `× 4`).
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields an empty vector.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Output is a pure function of the inputs.
pub fn chunk_page(
    file_id: &str,
    source_file: &str,
    page_no: u32,
    text: &str,
    max_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return Vec::new();
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for sentence in split_sentences(&collapsed) {
        if sentence.len() > max_chars {
            if !current_buf.is_empty() {
                pieces.push(std::mem::take(&mut current_buf));
            }
            pieces.extend(hard_split(sentence, max_chars));
            continue;
        }

        let would_be = if current_buf.is_empty() {
            sentence.len()
        } else {
            current_buf.len() + 1 + sentence.len()
        };
        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if !current_buf.is_empty() {
            current_buf.push(' ');
        }
        current_buf.push_str(sentence);
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Chunk {
            chunk_id: chunk_id(file_id, page_no, idx),
            text,
            source_file: source_file.to_string(),
            page_no,
        })
        .collect()
}

/// Chunk every page of a document in page order.
pub fn chunk_pages<'a, I>(file_id: &str, source_file: &str, pages: I, max_tokens: usize) -> Vec<Chunk>
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    pages
        .into_iter()
        .flat_map(|(page_no, text)| chunk_page(file_id, source_file, page_no, text, max_tokens))
        .collect()
}

/// Split an oversized sentence at space boundaries no longer than `max_chars`.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = sentence;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = remaining[..limit]
            .rfind(' ')
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    out.retain(|p| !p.is_empty());
    out
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_basic() {
        let s = split_sentences("One. Two! Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_split_sentences_keeps_decimals_and_closers() {
        let s = split_sentences("The fee is $1.50 per day. He said \"stop.\" Then left.");
        assert_eq!(
            s,
            vec!["The fee is $1.50 per day.", "He said \"stop.\"", "Then left."]
        );
    }

    #[test]
    fn test_small_page_single_chunk() {
        let chunks = chunk_page("doc1", "doc1.pdf", 1, "Hello, world.", 400);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "doc1_1_0");
        assert_eq!(chunks[0].text, "Hello, world.");
        assert_eq!(chunks[0].page_no, 1);
        assert_eq!(chunks[0].source_file, "doc1.pdf");
    }

    #[test]
    fn test_empty_page_yields_no_chunks() {
        assert!(chunk_page("doc1", "doc1.pdf", 1, "", 400).is_empty());
        assert!(chunk_page("doc1", "doc1.pdf", 1, " \n\t ", 400).is_empty());
    }

    #[test]
    fn test_two_sentences_two_chunks() {
        let text = "Domestic animals are permitted subject to local law. \
                    Residents must register pets annually.";
        let chunks = chunk_page("doc1", "doc1.pdf", 1, text, 15);
        let ids: Vec<_> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["doc1_1_0", "doc1_1_1"]);
        assert_eq!(
            chunks[0].text,
            "Domestic animals are permitted subject to local law."
        );
    }

    #[test]
    fn test_never_splits_mid_sentence_when_avoidable() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} ends here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_page("doc1", "doc1.pdf", 2, &text, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.ends_with('.'), "chunk ended mid-sentence: {}", c.text);
            assert!(c.text.len() <= 80);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous_per_page() {
        let text = "Alpha beta gamma. ".repeat(60);
        let chunks = chunk_pages("f", "f.pdf", vec![(1, text.as_str()), (2, text.as_str())], 10);
        let page1: Vec<_> = chunks.iter().filter(|c| c.page_no == 1).collect();
        let page2: Vec<_> = chunks.iter().filter(|c| c.page_no == 2).collect();
        assert_eq!(page1.len(), page2.len());
        for (i, c) in page1.iter().enumerate() {
            assert_eq!(c.chunk_id, format!("f_1_{}", i));
        }
        for (i, c) in page2.iter().enumerate() {
            assert_eq!(c.chunk_id, format!("f_2_{}", i));
        }
    }

    #[test]
    fn test_oversized_sentence_hard_split() {
        let text = "word ".repeat(100);
        let chunks = chunk_page("doc1", "doc1.txt", 0, &text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.starts_with(' ') && !c.text.ends_with(' '));
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐ │ Hello world │ └──────────────────┘";
        let chunks = chunk_page("doc1", "doc1.txt", 0, text, 3);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha one. Beta two.\n\nGamma three. Delta four.";
        let c1 = chunk_page("doc1", "doc1.pdf", 1, text, 4);
        let c2 = chunk_page("doc1", "doc1.pdf", 1, text, 4);
        assert_eq!(c1, c2);
    }
}
