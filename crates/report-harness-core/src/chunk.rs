//! Overlapping, separator-aware text chunker.
//!
//! Splits corpus text into segments of at most `chunk_size` characters with
//! `chunk_overlap` characters shared between neighbours. Cuts prefer
//! paragraph and sentence boundaries over mid-token splits.
//!
//! Output is deterministic: the persisted chunk list and the vector index
//! are positionally coupled, so re-chunking the same corpus with the same
//! configuration must give byte-identical chunks.
//!
//! # Algorithm
//!
//! 1. Take a window of `chunk_size` characters starting at the cursor.
//! 2. If the window reaches the end of the text, emit it and stop.
//! 3. Otherwise search the second half of the window for the separators in
//!    priority order (`\n\n`, `\n`, `。`, …) and cut just after the last
//!    occurrence of the first one found. With no separator, hard-cut at the
//!    window end.
//! 4. Emit the trimmed segment (whitespace-only segments are skipped).
//! 5. Move the cursor `chunk_overlap` characters back from the cut.
//!
//! Lengths are counted in `char`s, so CJK text gets the same chunk sizes as
//! ASCII text.
//!
//! # Example
//!
//! ```rust
//! use report_harness_core::chunk::{ChunkConfig, Chunker};
//!
//! let chunker = Chunker::new(ChunkConfig::default()).unwrap();
//! let chunks: Vec<&str> = chunker.chunks("第一段。\n\n第二段。").collect();
//! assert_eq!(chunks, vec!["第一段。\n\n第二段。"]);
//! ```

use crate::error::ChunkingError;
use crate::models::{Chunk, SourceDocument};

/// Default separators, highest priority first.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", "。", "！", "？", ". ", "；", "，", " "];

/// Chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters repeated at the start of the next chunk.
    pub chunk_overlap: usize,
    /// Preferred cut points, highest priority first.
    pub separators: Vec<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            chunk_overlap: 30,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        }
    }
}

/// A validated chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Result<Self, ChunkingError> {
        if config.chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ChunkingError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Lazily split `text`. The iterator is `Clone`; calling this again
    /// restarts from the beginning.
    pub fn chunks<'a>(&'a self, text: &'a str) -> Chunks<'a> {
        Chunks {
            text,
            pos: 0,
            floor: 0,
            config: &self.config,
            done: text.is_empty(),
        }
    }
}

/// Iterator over the chunks of one text. See [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset where the next window starts.
    pos: usize,
    /// Byte offset of the previous cut; the next cut must land after it.
    floor: usize,
    config: &'a ChunkConfig,
    done: bool,
}

impl<'a> Chunks<'a> {
    fn find_cut(&self, window_end: usize) -> usize {
        let half = self.pos + char_offset(&self.text[self.pos..], self.config.chunk_size / 2);
        let lower = half.max(self.floor).min(window_end);
        let region = &self.text[lower..window_end];
        for sep in &self.config.separators {
            if sep.is_empty() {
                continue;
            }
            if let Some(p) = region.rfind(sep.as_str()) {
                return lower + p + sep.len();
            }
        }
        window_end
    }

    fn next_start(&self, cut: usize) -> usize {
        if self.config.chunk_overlap == 0 {
            return cut;
        }
        let back = self.text[..cut]
            .char_indices()
            .rev()
            .nth(self.config.chunk_overlap - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        if back <= self.pos {
            cut
        } else {
            back
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while !self.done {
            let window_end = self.pos + char_offset(&self.text[self.pos..], self.config.chunk_size);
            let cut = if window_end >= self.text.len() {
                self.text.len()
            } else {
                self.find_cut(window_end)
            };

            let piece = self.text[self.pos..cut].trim();

            if cut >= self.text.len() || self.text[cut..].trim().is_empty() {
                self.done = true;
            } else {
                let next = self.next_start(cut);
                self.floor = cut;
                self.pos = next;
            }

            if !piece.is_empty() {
                return Some(piece);
            }
        }
        None
    }
}

/// Byte offset of the `n`th char of `s`, or `s.len()` if `s` is shorter.
fn char_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Chunk a whole corpus, assigning contiguous indices in corpus order.
///
/// Fails with [`ChunkingError::EmptyInput`] when no document yields a chunk.
pub fn chunk_corpus(docs: &[SourceDocument], chunker: &Chunker) -> Result<Vec<Chunk>, ChunkingError> {
    let mut chunks = Vec::new();
    for doc in docs {
        for text in chunker.chunks(&doc.body) {
            chunks.push(Chunk {
                index: chunks.len(),
                source: doc.source.clone(),
                text: text.to_string(),
            });
        }
    }
    if chunks.is_empty() {
        return Err(ChunkingError::EmptyInput);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkConfig::new(size, overlap)).unwrap()
    }

    fn doc(source: &str, body: &str) -> SourceDocument {
        SourceDocument {
            source: source.to_string(),
            content_type: "text/plain".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let c = chunker(200, 30);
        let chunks: Vec<&str> = c.chunks("Hello, world!").collect();
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let c = chunker(200, 30);
        assert_eq!(c.chunks("").count(), 0);
        assert_eq!(c.chunks("   \n\n  ").count(), 0);
    }

    #[test]
    fn test_corpus_empty_input_error() {
        let c = chunker(200, 30);
        let err = chunk_corpus(&[doc("a.txt", ""), doc("b.txt", " \n")], &c).unwrap_err();
        assert_eq!(err, ChunkingError::EmptyInput);
    }

    #[test]
    fn test_invalid_config() {
        assert!(Chunker::new(ChunkConfig::new(0, 0)).is_err());
        assert!(Chunker::new(ChunkConfig::new(10, 10)).is_err());
        assert!(Chunker::new(ChunkConfig::new(10, 9)).is_ok());
    }

    #[test]
    fn test_hard_cut_with_overlap() {
        let text: String = (0..500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let c = chunker(200, 30);
        let chunks: Vec<&str> = c.chunks(&text).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 200);
        assert_eq!(chunks[1].len(), 200);
        assert_eq!(chunks[2].len(), 160);
        assert!(chunks[1].starts_with(&chunks[0][170..]));
        assert!(chunks[2].starts_with(&chunks[1][170..]));
        assert!(text.ends_with(chunks[2]));
    }

    #[test]
    fn test_cjk_counts_chars_and_prefers_sentence_end() {
        let text = "经济发展。".repeat(100);
        let c = chunker(200, 30);
        let chunks: Vec<&str> = c.chunks(&text).collect();
        assert!(chunks.len() > 1);
        for ch in &chunks {
            assert!(ch.chars().count() <= 200);
            assert!(ch.ends_with('。'), "chunk should end at a sentence: {}", ch);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let para_a = "a".repeat(120);
        let para_b = "b".repeat(120);
        let text = format!("{}\n\n{}", para_a, para_b);
        let c = chunker(200, 0);
        let chunks: Vec<&str> = c.chunks(&text).collect();
        assert_eq!(chunks, vec![para_a.as_str(), para_b.as_str()]);
    }

    #[test]
    fn test_large_overlap_terminates() {
        let text = "一二三四五六七八九十，".repeat(60);
        let c = chunker(20, 15);
        let chunks: Vec<&str> = c.chunks(&text).collect();
        assert!(!chunks.is_empty());
        assert!(chunks.len() < text.chars().count());
        for ch in &chunks {
            assert!(ch.chars().count() <= 20);
        }
    }

    #[test]
    fn test_no_empty_chunks() {
        let text = "First.\n\n\n\n   \n\nSecond.\n\n   ";
        let c = chunker(8, 2);
        for ch in c.chunks(text) {
            assert!(!ch.trim().is_empty());
        }
    }

    #[test]
    fn test_restartable() {
        let text = "Alpha beta gamma. ".repeat(40);
        let c = chunker(50, 10);
        let iter = c.chunks(&text);
        let first: Vec<&str> = iter.clone().collect();
        let second: Vec<&str> = iter.collect();
        let third: Vec<&str> = c.chunks(&text).collect();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_deterministic_corpus() {
        let docs = vec![
            doc("a.txt", &"区域经济发展现状良好，人口稳定增长。".repeat(30)),
            doc("b.txt", "Short note.\n\nAnother paragraph."),
        ];
        let c = chunker(200, 30);
        let c1 = chunk_corpus(&docs, &c).unwrap();
        let c2 = chunk_corpus(&docs, &c).unwrap();
        assert_eq!(c1, c2);
        for (i, ch) in c1.iter().enumerate() {
            assert_eq!(ch.index, i);
        }
        assert_eq!(c1.last().unwrap().source, "b.txt");
    }
}
