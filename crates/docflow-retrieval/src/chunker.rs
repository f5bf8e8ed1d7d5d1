//! Paragraph-oriented text chunking for embedding generation.
//!
//! Documents split at blank-line paragraph boundaries, and consecutive
//! paragraphs pack greedily into chunks up to a maximum character count.
//! A single paragraph longer than the maximum is hard-split into
//! `ceil(len/max)` evenly sized, character-boundary-safe pieces.

use docflow_core::defaults;
use once_cell::sync::Lazy;
use regex::Regex;

/// Blank-line boundary between paragraphs.
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n|\r\n\s*\r\n").unwrap());

/// Chunk text using the default maximum chunk length.
pub fn chunk_document(text: &str) -> Vec<String> {
    chunk_text(text, defaults::CHUNK_MAX_CHARS)
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Paragraphs pack greedily in document order, joined by a blank line.
/// A paragraph that alone exceeds `max_chars` flushes the current chunk
/// and is hard-split on its own. Empty or whitespace-only input yields
/// no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in split_paragraphs(text) {
        let para_chars = paragraph.chars().count();

        if para_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            chunks.extend(hard_split(paragraph, max_chars));
            continue;
        }

        // +2 accounts for the blank-line join.
        if !current.is_empty() && current_chars + 2 + para_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if current.is_empty() {
            current.push_str(paragraph);
            current_chars = para_chars;
        } else {
            current.push_str("\n\n");
            current.push_str(paragraph);
            current_chars += 2 + para_chars;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split text at blank-line boundaries, dropping empty paragraphs.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut last_end = 0;

    for mat in PARAGRAPH_BREAK.find_iter(text) {
        let para = text[last_end..mat.start()].trim();
        if !para.is_empty() {
            paragraphs.push(para);
        }
        last_end = mat.end();
    }

    // Final paragraph
    if last_end < text.len() {
        let para = text[last_end..].trim();
        if !para.is_empty() {
            paragraphs.push(para);
        }
    }

    paragraphs
}

/// Split an oversize paragraph into `ceil(len/max_chars)` pieces of at
/// most `max_chars` characters each, never cutting inside a code point.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let total = paragraph.chars().count();
    let pieces = total.div_ceil(max_chars);
    let per_piece = total.div_ceil(pieces);

    let mut out = Vec::with_capacity(pieces);
    let mut piece = String::new();
    let mut count = 0usize;

    for ch in paragraph.chars() {
        piece.push(ch);
        count += 1;
        if count == per_piece {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            piece.clear();
            count = 0;
        }
    }
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }

    out
}
