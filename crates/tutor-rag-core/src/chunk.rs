//! Token-budgeted, overlap-linked text chunker.
//!
//! Splits normalized document text into ordered [`TextChunk`]s whose
//! estimated token count never exceeds `max_tokens`. Splitting prefers
//! paragraph boundaries, then sentence boundaries, and only falls back to
//! raw word boundaries for runs of text with no usable breaks.
//!
//! # Algorithm
//!
//! 1. Normalize line endings and whitespace ([`normalize_text`]).
//! 2. Split into paragraphs on blank lines.
//! 3. Paragraphs too large for one chunk are split into sentences
//!    (`.`, `!` or `?` followed by whitespace); sentences still too large
//!    are split on word boundaries.
//! 4. Greedily pack the resulting pieces into a buffer while the estimate
//!    stays within `max_tokens`.
//! 5. When the next piece does not fit, emit the buffer and seed the next
//!    one with the last `min(overlap_tokens, 30% of the emitted words)`
//!    words of the emitted chunk.
//! 6. The trailing buffer is always emitted, so every word of the input
//!    lands in some chunk.
//!
//! Every chunk is an exact slice of the normalized text, so the overlap
//! of chunk `i` is byte-for-byte the tail of chunk `i - 1`.
//!
//! # Example
//!
//! ```rust
//! use tutor_rag_core::chunk::{chunk_document, ChunkingOptions};
//!
//! let result = chunk_document("Hello world.\n\nSecond paragraph.", &ChunkingOptions::default()).unwrap();
//! assert_eq!(result.chunks.len(), 1);
//! assert_eq!(result.chunks[0].index, 0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ChunkError;

pub const DEFAULT_MIN_TOKENS: usize = 500;
pub const DEFAULT_MAX_TOKENS: usize = 800;
pub const DEFAULT_OVERLAP_TOKENS: usize = 100;

/// Lower bound for the relaxed minimum applied to short documents.
const RELAXED_MIN_FLOOR: usize = 10;

/// Token budget for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingOptions {
    pub min_tokens: usize,
    pub max_tokens: usize,
    /// Upper bound, in words, on the overlap copied between chunks.
    pub overlap_tokens: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            min_tokens: DEFAULT_MIN_TOKENS,
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.min_tokens == 0 {
            return Err(ChunkError::InvalidConfig(
                "min_tokens must be greater than 0".into(),
            ));
        }
        if self.max_tokens <= self.min_tokens {
            return Err(ChunkError::InvalidConfig(
                "max_tokens must be greater than min_tokens".into(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkError::InvalidConfig(
                "overlap_tokens must be less than max_tokens".into(),
            ));
        }
        Ok(())
    }

    /// Options adjusted for a document of `text_tokens` estimated tokens.
    ///
    /// Documents shorter than `min_tokens` get a proportional minimum of
    /// `max(10, floor(0.8 × text_tokens))`, kept below `max_tokens`.
    pub fn relaxed_for(&self, text_tokens: usize) -> Self {
        if text_tokens >= self.min_tokens {
            return *self;
        }
        let relaxed = (text_tokens * 4 / 5)
            .max(RELAXED_MIN_FLOOR)
            .min(self.max_tokens.saturating_sub(1))
            .max(1);
        Self {
            min_tokens: relaxed,
            ..*self
        }
    }

    /// Largest word count whose estimate fits in `max_tokens`.
    fn max_words(&self) -> usize {
        (self.max_tokens * 10 / 13).max(1)
    }

    /// Largest piece packed as a unit. Leaves room for the overlap that
    /// will precede it when it opens a new chunk, at least one word
    /// whenever overlap is enabled.
    fn piece_words(&self) -> usize {
        let max_words = self.max_words();
        let mut reserve = self.overlap_tokens.min(max_words * 3 / 10);
        if self.overlap_tokens > 0 {
            reserve = reserve.max(1);
        }
        max_words.saturating_sub(reserve).max(1)
    }
}

/// Count whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Estimate tokens as `ceil(words × 1.3)`.
///
/// A deterministic approximation, not a subword tokenizer. Used for both
/// budgeting and reported metadata.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_words(count_words(text))
}

fn tokens_for_words(words: usize) -> usize {
    (words * 13).div_ceil(10)
}

/// Normalize line endings and collapse redundant whitespace.
///
/// `\r\n` becomes `\n`, three or more consecutive newlines become a blank
/// line, runs of spaces and tabs become a single space, and the result is
/// trimmed.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    let mut in_blank = false;

    for ch in text.chars() {
        match ch {
            '\n' => {
                in_blank = false;
                newlines += 1;
                if newlines <= 2 {
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                newlines = 0;
                if !in_blank {
                    out.push(' ');
                    in_blank = true;
                }
            }
            _ => {
                newlines = 0;
                in_blank = false;
                out.push(ch);
            }
        }
    }

    out.trim().to_string()
}

/// One chunk of a document, produced by [`chunk_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Zero-based, contiguous position within the document.
    pub index: usize,
    pub text: String,
    pub tokens: usize,
    /// Character offset of the chunk start within the normalized text.
    pub start_char: usize,
    /// Character offset one past the chunk end within the normalized text.
    pub end_char: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    /// Number of leading words copied from the previous chunk.
    pub overlap_words: usize,
    pub has_overlap: bool,
}

/// Aggregate metadata for a chunking run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkingMetadata {
    /// Length of the input in characters, before normalization.
    pub original_length: usize,
    pub average_chunk_size: f64,
    /// `overlap_tokens / max_tokens × 100`.
    pub overlap_percentage: f64,
    /// The `min_tokens` in effect for this run.
    pub min_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkingResult {
    pub chunks: Vec<TextChunk>,
    pub total_tokens: usize,
    pub total_chunks: usize,
    pub metadata: ChunkingMetadata,
}

/// A byte range of the normalized text with its word count.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    words: usize,
}

/// The chunk under construction.
#[derive(Debug, Clone, Copy)]
struct Buffer {
    span: Span,
    overlap_words: usize,
}

/// Split `text` into ordered, token-bounded, overlapping chunks.
///
/// # Errors
///
/// - [`ChunkError::InvalidConfig`] if `options` fail [`ChunkingOptions::validate`].
/// - [`ChunkError::NoContent`] if the normalized text contains no words.
pub fn chunk_document(text: &str, options: &ChunkingOptions) -> Result<ChunkingResult, ChunkError> {
    options.validate()?;

    let normalized = normalize_text(text);
    let max_words = options.max_words();
    let pieces = split_pieces(&normalized, options.piece_words());

    let mut emitted: Vec<Buffer> = Vec::new();
    let mut buffer: Option<Buffer> = None;

    for piece in pieces {
        let next = match buffer.take() {
            None => Buffer {
                span: piece,
                overlap_words: 0,
            },
            Some(buf) if buf.span.words + piece.words <= max_words => Buffer {
                span: Span {
                    start: buf.span.start,
                    end: piece.end,
                    words: buf.span.words + piece.words,
                },
                overlap_words: buf.overlap_words,
            },
            Some(buf) => {
                let mut overlap = (buf.span.words * 3 / 10).min(options.overlap_tokens);
                if options.overlap_tokens > 0 {
                    overlap = overlap.max(1);
                }
                let overlap = overlap.min(max_words - piece.words);
                let start = if overlap == 0 {
                    piece.start
                } else {
                    tail_start(&normalized, buf.span, overlap)
                };
                emitted.push(buf);
                Buffer {
                    span: Span {
                        start,
                        end: piece.end,
                        words: overlap + piece.words,
                    },
                    overlap_words: overlap,
                }
            }
        };
        buffer = Some(next);
    }

    // Trailing buffer is kept even below min_tokens so no text is lost.
    if let Some(buf) = buffer {
        emitted.push(buf);
    }

    if emitted.is_empty() {
        return Err(ChunkError::NoContent {
            tokens: 0,
            min_tokens: options.min_tokens,
        });
    }

    let mut starts = CharOffsets::new(&normalized);
    let mut ends = CharOffsets::new(&normalized);
    let chunks: Vec<TextChunk> = emitted
        .iter()
        .enumerate()
        .map(|(index, buf)| {
            let text = &normalized[buf.span.start..buf.span.end];
            TextChunk {
                index,
                text: text.to_string(),
                tokens: tokens_for_words(buf.span.words),
                start_char: starts.at(buf.span.start),
                end_char: ends.at(buf.span.end),
                word_count: buf.span.words,
                sentence_count: sentence_spans(text, 0).len(),
                overlap_words: buf.overlap_words,
                has_overlap: buf.overlap_words > 0,
            }
        })
        .collect();

    let total_tokens: usize = chunks.iter().map(|c| c.tokens).sum();
    let total_chunks = chunks.len();

    tracing::debug!(
        chunks = total_chunks,
        total_tokens,
        "document chunked"
    );

    Ok(ChunkingResult {
        total_tokens,
        total_chunks,
        metadata: ChunkingMetadata {
            original_length: text.chars().count(),
            average_chunk_size: total_tokens as f64 / total_chunks as f64,
            overlap_percentage: options.overlap_tokens as f64 / options.max_tokens as f64 * 100.0,
            min_tokens: options.min_tokens,
        },
        chunks,
    })
}

/// Break normalized text into packable pieces of at most `limit` words.
fn split_pieces(text: &str, limit: usize) -> Vec<Span> {
    let mut pieces = Vec::new();
    for para in paragraph_spans(text) {
        if para.words <= limit {
            pieces.push(para);
            continue;
        }
        for sentence in sentence_spans(&text[para.start..para.end], para.start) {
            if sentence.words <= limit {
                pieces.push(sentence);
            } else {
                pieces.extend(word_groups(text, sentence, limit));
            }
        }
    }
    pieces
}

/// Paragraphs separated by lines that are empty or whitespace-only.
fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in text.split('\n') {
        let line_start = offset;
        offset += line.len() + 1;

        if line.trim().is_empty() {
            if let Some((start, end)) = current.take() {
                spans.push(make_span(text, start, end));
            }
            continue;
        }

        let end = line_start + line.trim_end().len();
        current = match current {
            Some((start, _)) => Some((start, end)),
            None => Some((line_start + (line.len() - line.trim_start().len()), end)),
        };
    }
    if let Some((start, end)) = current {
        spans.push(make_span(text, start, end));
    }

    spans
}

/// Sentences of `text`, split after a run of `.`, `!` or `?` that is
/// followed by whitespace. Terminal punctuation stays with its sentence.
/// Offsets are shifted by `base`.
fn sentence_spans(text: &str, base: usize) -> Vec<Span> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map(|&(b, _)| b).unwrap_or(text.len());
    let is_terminal = |c: char| matches!(c, '.' | '!' | '?');

    let mut spans = Vec::new();
    let mut sentence_start = 0;
    let mut i = 0;

    while i < chars.len() {
        if !is_terminal(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < chars.len() && is_terminal(chars[j].1) {
            j += 1;
        }
        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        if k > j {
            push_trimmed(text, base, sentence_start, byte_at(j), &mut spans);
            sentence_start = byte_at(k);
        }
        i = k;
    }
    push_trimmed(text, base, sentence_start, text.len(), &mut spans);

    spans
}

fn push_trimmed(text: &str, base: usize, start: usize, end: usize, spans: &mut Vec<Span>) {
    let slice = &text[start..end];
    let words = count_words(slice);
    if words == 0 {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    let trimmed_end = start + slice.trim_end().len();
    spans.push(Span {
        start: base + start + lead,
        end: base + trimmed_end,
        words,
    });
}

/// Consecutive groups of at most `limit` words covering `span`.
fn word_groups(text: &str, span: Span, limit: usize) -> Vec<Span> {
    word_bounds(&text[span.start..span.end])
        .chunks(limit)
        .filter_map(|group| {
            let (first, _) = group.first()?;
            let (_, last) = group.last()?;
            Some(Span {
                start: span.start + first,
                end: span.start + last,
                words: group.len(),
            })
        })
        .collect()
}

/// Byte ranges of each whitespace-separated word in `s`.
fn word_bounds(s: &str) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut current: Option<usize> = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if let Some(start) = current.take() {
                bounds.push((start, i));
            }
        } else if current.is_none() {
            current = Some(i);
        }
    }
    if let Some(start) = current {
        bounds.push((start, s.len()));
    }
    bounds
}

/// Byte offset where the last `words` words of `span` begin.
fn tail_start(text: &str, span: Span, words: usize) -> usize {
    let bounds = word_bounds(&text[span.start..span.end]);
    let idx = bounds.len().saturating_sub(words);
    bounds
        .get(idx)
        .map(|&(start, _)| span.start + start)
        .unwrap_or(span.start)
}

fn make_span(text: &str, start: usize, end: usize) -> Span {
    Span {
        start,
        end,
        words: count_words(&text[start..end]),
    }
}

/// Converts monotonically increasing byte offsets into char offsets.
struct CharOffsets<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharOffsets<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    fn at(&mut self, byte: usize) -> usize {
        if byte < self.byte {
            self.byte = 0;
            self.chars = 0;
        }
        self.chars += self.text[self.byte..byte].chars().count();
        self.byte = byte;
        self.chars
    }
}
