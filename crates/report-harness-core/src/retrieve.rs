//! Top-k retrieval over a chunk list and its vector index.
//!
//! The chunk list and the index are positionally coupled: vector id *i*
//! resolves to `chunks[i]`. An id outside the chunk list means the two
//! files were built from different corpora, which is reported as
//! [`RetrievalError::IndexDesync`] rather than silently dropping hits.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::index::FlatL2Index;
use crate::models::RetrievedChunk;

/// Joins retrieved chunk texts in [`Retrieval::joined`].
pub const RETRIEVAL_SEPARATOR: &str = "\n\n";

/// SHA-256 over the length-prefixed chunk texts.
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` distinct.
pub fn chunk_digest(chunks: &[String]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((chunks.len() as u64).to_le_bytes());
    for c in chunks {
        hasher.update((c.len() as u64).to_le_bytes());
        hasher.update(c.as_bytes());
    }
    hasher.finalize().into()
}

/// A chunk list paired with the index built from it.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub chunks: Vec<String>,
    pub index: FlatL2Index,
}

impl KnowledgeBase {
    /// Pair a chunk list with an index without checking them.
    pub fn from_parts(chunks: Vec<String>, index: FlatL2Index) -> Self {
        Self { chunks, index }
    }

    pub fn digest(&self) -> [u8; 32] {
        chunk_digest(&self.chunks)
    }

    /// Check entry counts and the digest recorded in the index file.
    pub fn verify(&self, expected_digest: &[u8; 32]) -> Result<(), RetrievalError> {
        if self.chunks.len() != self.index.len() {
            return Err(RetrievalError::IndexDesync {
                chunks: self.chunks.len(),
                max_id: self.index.len().saturating_sub(1),
            });
        }
        if &self.digest() != expected_digest {
            return Err(RetrievalError::DigestMismatch);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Ranked chunks for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub chunks: Vec<RetrievedChunk>,
}

impl Retrieval {
    /// Chunk texts in ranked order, separated by [`RETRIEVAL_SEPARATOR`].
    pub fn joined(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(RETRIEVAL_SEPARATOR)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Embeds a query and resolves its nearest chunks.
pub struct Retriever<'a> {
    embedder: &'a dyn EmbeddingProvider,
    kb: &'a KnowledgeBase,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a dyn EmbeddingProvider, kb: &'a KnowledgeBase) -> Self {
        Self { embedder, kb }
    }

    /// At most `k` chunks, fewer only when the index holds fewer vectors.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval, RetrievalError> {
        let vector = embed_query(self.embedder, query).await?;
        let hits = self.kb.index.search(&vector, k)?;

        if let Some(max_id) = hits.iter().map(|h| h.id).max() {
            if max_id >= self.kb.chunks.len() {
                return Err(RetrievalError::IndexDesync {
                    chunks: self.kb.chunks.len(),
                    max_id,
                });
            }
        }

        debug!(
            query_chars = query.chars().count(),
            k,
            hits = hits.len(),
            "retrieved chunks"
        );

        Ok(Retrieval {
            chunks: hits
                .into_iter()
                .map(|h| RetrievedChunk {
                    id: h.id,
                    distance: h.distance,
                    text: self.kb.chunks[h.id].clone(),
                })
                .collect(),
        })
    }
}
