use sha2::{Digest, Sha256};

use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, PipelineOptions};

/// Boundaries tried from coarsest to finest when deciding where a chunk
/// may end or an overlap may begin. A hard character cut is the final
/// fallback that always terminates.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&PipelineOptions> for ChunkingConfig {
    fn from(value: &PipelineOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidConfiguration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Canonicalizes whitespace ahead of chunking: tabs and non-breaking
/// spaces become single spaces, CRLF and lone CR become LF. Chunk
/// offsets are computed on the returned text.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', " ")
        .replace('\u{a0}', " ")
}

/// Splits every page of `document` into size-bounded chunks, numbering
/// them with one sequence that runs across the whole document.
pub fn split_document(document: &Document, config: ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for (page_index, page) in document.pages.iter().enumerate() {
        let normalized = normalize_text(page);
        let page_chunks = split_page(
            &normalized,
            &document.document_id,
            page_index,
            config,
            cursor,
        )?;
        cursor += page_chunks.len() as u64;
        chunks.extend(page_chunks);
    }

    Ok(chunks)
}

/// Splits one page into chunks of at most `chunk_size` characters, each
/// chunk after the first sharing up to `chunk_overlap` trailing
/// characters with its predecessor. `sequence_start` numbers the first
/// chunk.
///
/// A chunk tentatively ends `chunk_size` characters after its start and
/// is snapped back to the nearest separator boundary inside the chunk;
/// the next chunk starts `chunk_overlap` characters before that end,
/// snapped forward to the first boundary inside the overlap window.
/// Offsets are character offsets into `text`.
pub fn split_page(
    text: &str,
    document_id: &str,
    page_index: usize,
    config: ChunkingConfig,
    sequence_start: u64,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut sequence = sequence_start;
    let mut start = 0usize;

    loop {
        let hard_end = (start + config.chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            snap_end(&chars, start, hard_end)
        };

        let piece: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            chunk_id: chunk_id(document_id, page_index, sequence, &piece),
            document_id: document_id.to_string(),
            page_index,
            start_offset: start,
            end_offset: end,
            sequence_index: sequence,
            text: piece,
        });
        sequence += 1;

        if end == chars.len() {
            break;
        }

        let overlap_start = end.saturating_sub(config.chunk_overlap);
        let mut next = snap_overlap(&chars, overlap_start, end);
        if next <= start {
            // forward progress: degenerate snaps restart at the cut
            next = end;
        }
        start = next;
    }

    Ok(chunks)
}

/// Largest boundary in `(start, hard_end]` where a separator ends,
/// trying separators in priority order; `hard_end` when none match.
fn snap_end(chars: &[char], start: usize, hard_end: usize) -> usize {
    for separator in SEPARATORS {
        if let Some(boundary) = last_boundary(chars, separator, start, hard_end) {
            return boundary;
        }
    }
    hard_end
}

fn last_boundary(chars: &[char], separator: &str, start: usize, max_boundary: usize) -> Option<usize> {
    let sep: Vec<char> = separator.chars().collect();
    let mut boundary = max_boundary;
    while boundary > start {
        if boundary >= start + sep.len() && chars[boundary - sep.len()..boundary] == sep[..] {
            return Some(boundary);
        }
        boundary -= 1;
    }
    None
}

/// First boundary in `[overlap_start, end)` where a separator ends, so
/// the overlap begins on a clean boundary; `overlap_start` (a hard cut)
/// when the window has none.
fn snap_overlap(chars: &[char], overlap_start: usize, end: usize) -> usize {
    for separator in SEPARATORS {
        let sep: Vec<char> = separator.chars().collect();
        for boundary in overlap_start..end {
            if boundary >= sep.len() && chars[boundary - sep.len()..boundary] == sep[..] {
                return boundary;
            }
        }
    }
    overlap_start
}

fn chunk_id(document_id: &str, page_index: usize, sequence: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((page_index as u64).to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
