//! Fixed-window text chunker.
//!
//! Splits extracted text into [`Chunk`]s of at most `size` characters, a new
//! chunk starting every `size - overlap` characters. The final chunk holds
//! whatever remains: it is never padded and never dropped. Boundaries are
//! purely length-based, so the same text and parameters always yield the
//! same chunk sequence.
//!
//! Lengths and offsets count `char`s, not bytes, so multi-byte text is never
//! split inside a code point.

use crate::error::ChunkError;
use crate::models::Chunk;

/// Split `text` into overlapping windows of `size` characters.
///
/// Returns an empty vector for empty text. Indices are contiguous from 0.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkError> {
    if size == 0 {
        return Err(ChunkError::ZeroSize);
    }
    if overlap >= size {
        return Err(ChunkError::OverlapTooLarge { size, overlap });
    }

    // Byte offset of every char boundary, plus the end of the string, so that
    // char position `i` maps to `bounds[i]`.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;
    let step = size - overlap;

    let mut chunks = Vec::with_capacity(total.div_ceil(step));
    let mut start = 0;
    while start < total {
        let end = (start + size).min(total);
        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end,
            text: text[bounds[start]..bounds[end]].to_string(),
            embedding: None,
        });
        if end == total {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Concatenate chunks with each chunk's leading overlap removed.
///
/// Inverse of [`chunk_text`] for a well-formed chunk sequence.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered: usize = 0;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = chunk.end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_size() {
        assert_eq!(chunk_text("abc", 0, 0), Err(ChunkError::ZeroSize));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert_eq!(
            chunk_text("abc", 4, 4),
            Err(ChunkError::OverlapTooLarge {
                size: 4,
                overlap: 4
            })
        );
        assert!(chunk_text("abc", 4, 9).is_err());
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn exact_multiple_without_overlap() {
        let chunks = chunk_text("abcdefghij", 5, 0).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcde", "fghij"]);
    }

    #[test]
    fn final_chunk_truncated_not_dropped() {
        let chunks = chunk_text("abcdefghijk", 5, 2).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcde", "defgh", "ghijk"]);

        let chunks = chunk_text("abcdefghijkl", 5, 2).unwrap();
        assert_eq!(chunks.last().unwrap().text, "jkl");
    }

    #[test]
    fn paris_example_two_chunks() {
        let text = "Paris is the capital of France. It is known for the Eiffel Tower.";
        let chunks = chunk_text(text, 40, 10).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end - chunks[1].start, 10);
        assert!(chunks[0].text.contains("capital of France"));
        assert!(chunks[1].text.contains("Eiffel Tower"));
        assert!(!chunks[0].text.contains("Eiffel"));
    }

    #[test]
    fn indices_contiguous_and_sizes_bounded() {
        let text = "lorem ipsum dolor sit amet ".repeat(40);
        let chunks = chunk_text(&text, 37, 11).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.char_len() <= 37);
            assert!(c.char_len() > 0);
        }
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 11);
        }
    }

    #[test]
    fn reassembly_reconstructs_text() {
        let digits = "0123456789".repeat(17);
        let texts = [
            "a",
            "Paris is the capital of France. It is known for the Eiffel Tower.",
            "Zürich: Ωmega façade, naïve café. 東京は日本の首都です。",
            digits.as_str(),
        ];
        for text in texts {
            for (size, overlap) in [(1, 0), (3, 1), (7, 0), (10, 9), (40, 10), (500, 50)] {
                let chunks = chunk_text(text, size, overlap).unwrap();
                assert_eq!(
                    reassemble(&chunks),
                    text,
                    "size={} overlap={}",
                    size,
                    overlap
                );
            }
        }
    }

    #[test]
    fn multibyte_offsets_are_char_positions() {
        let text = "ééééé";
        let chunks = chunk_text(text, 2, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text, "é");
        assert_eq!((chunks[2].start, chunks[2].end), (4, 5));
    }

    #[test]
    fn deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa.";
        let c1 = chunk_text(text, 12, 4).unwrap();
        let c2 = chunk_text(text, 12, 4).unwrap();
        assert_eq!(c1, c2);
    }
}
