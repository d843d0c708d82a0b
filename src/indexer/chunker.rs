use chrono::Utc;
use uuid::Uuid;

use super::FileMetadata;
use crate::db::models::DocumentChunk;

/// Size limits for [`chunk`], measured in `char`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&crate::config::IngestConfig> for ChunkOptions {
    fn from(config: &crate::config::IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Splits extracted text into overlapping chunks carrying the file's provenance.
///
/// Every chunk gets a fresh id, its position and the final sibling count.
pub fn chunk(text: &str, file: &FileMetadata, options: ChunkOptions) -> Vec<DocumentChunk> {
    let pieces = split_into_chunks(text, options);
    let total_chunks = pieces.len();
    let created_at = Utc::now();

    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| DocumentChunk {
            id: Uuid::new_v4().to_string(),
            content,
            source: file.source.clone(),
            filename: file.filename.clone(),
            chunk_index,
            total_chunks,
            created_at,
            file_type: file.file_type,
            file_size: file.file_size,
        })
        .collect()
}

/// Accumulates sentences into chunks of roughly `chunk_size` characters.
///
/// When the next sentence does not fit, the current buffer is closed and the
/// next one is seeded with its last `chunk_overlap` characters. Sentences are
/// never cut, so a chunk may exceed `chunk_size` by one sentence.
pub fn split_into_chunks(text: &str, options: ChunkOptions) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= options.chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if buffer_len > 0 && buffer_len + sentence_len > options.chunk_size {
            let tail = overlap_tail(&buffer, options.chunk_overlap).to_string();
            chunks.push(std::mem::take(&mut buffer));
            if !tail.is_empty() {
                buffer.push_str(&tail);
                buffer.push(' ');
            }
            buffer.push_str(sentence);
        } else {
            if !buffer.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(sentence);
        }
        buffer_len = buffer.chars().count();
    }

    if !buffer.trim().is_empty() {
        chunks.push(buffer);
    }

    chunks
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Splits after each run of `.`, `!` or `?`, keeping the punctuation.
/// Whitespace-only pieces are dropped.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let run_ends = !chars.peek().is_some_and(|&(_, next)| is_terminator(next));
        if is_terminator(c) && run_ends {
            let end = i + c.len_utf8();
            push_sentence(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_sentence(&mut sentences, &text[start..]);

    sentences
}

fn push_sentence<'a>(sentences: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        sentences.push(piece);
    }
}

/// Last `overlap` characters of `buffer` (all of it when shorter), without
/// leading whitespace.
fn overlap_tail(buffer: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    let count = buffer.chars().count();
    if count <= overlap {
        return buffer.trim_start();
    }
    buffer
        .char_indices()
        .nth(count - overlap)
        .map_or(buffer, |(idx, _)| &buffer[idx..])
        .trim_start()
}
