//! Text chunking
//!
//! Splits document content into ordered, overlapping chunks for embedding.
//! Boundaries prefer paragraph breaks, then sentence terminators, then any
//! whitespace, falling back to a hard cut when the window has no usable
//! boundary. The function is pure: identical inputs yield identical chunks.

use crate::domain::{chunk_id, SemanticChunk};
use unicode_segmentation::UnicodeSegmentation;

/// Split `text` into chunks of at most `chunk_size` characters with
/// `chunk_overlap` characters shared between neighbors.
///
/// Positions are zero-indexed and dense: whitespace-only windows are
/// dropped without leaving gaps in the numbering. Offsets count extended
/// grapheme clusters.
pub fn chunk_document(
    text: &str,
    document_id: &str,
    chunk_size: u32,
    chunk_overlap: u32,
) -> Vec<SemanticChunk> {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    let total = graphemes.len();
    if total == 0 {
        return Vec::new();
    }

    let size = (chunk_size as usize).max(1);
    let overlap = (chunk_overlap as usize).min(size - 1);

    let mut chunks = Vec::new();
    let mut position: u32 = 0;
    let mut start = 0usize;

    loop {
        let window_end = (start + size).min(total);
        let end = if window_end == total {
            total
        } else {
            find_boundary(&graphemes, start, window_end)
        };

        let chunk_text: String = graphemes[start..end].concat();
        if !chunk_text.trim().is_empty() {
            let token_count = ((end - start) / 4) as u32;
            chunks.push(SemanticChunk {
                id: chunk_id(document_id, position),
                document_id: document_id.to_string(),
                text: chunk_text,
                position,
                char_start: start as u64,
                char_end: end as u64,
                token_count: Some(token_count),
            });
            position += 1;
        }

        if end == total {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Best cut point in `(start, window_end]`, searched backward no further
/// than the middle of the window.
fn find_boundary(graphemes: &[&str], start: usize, window_end: usize) -> usize {
    let floor = start + (window_end - start) / 2;

    // Paragraph break: cut after the double newline.
    let mut i = window_end;
    while i > floor + 1 {
        if graphemes[i - 1] == "\n" && graphemes[i - 2] == "\n" {
            return i;
        }
        i -= 1;
    }

    // Sentence terminator followed by whitespace (or the end of input).
    let mut i = window_end;
    while i > floor {
        if matches!(graphemes[i - 1], "." | "!" | "?") {
            let followed_by_break = graphemes
                .get(i)
                .map_or(true, |next| next.chars().all(char::is_whitespace));
            if followed_by_break {
                return i;
            }
        }
        i -= 1;
    }

    // Any whitespace.
    let mut i = window_end;
    while i > floor {
        if is_whitespace(graphemes[i - 1]) {
            return i;
        }
        i -= 1;
    }

    window_end
}

fn is_whitespace(grapheme: &str) -> bool {
    !grapheme.is_empty() && grapheme.chars().all(char::is_whitespace)
}
