//! Core data models shared by the build and query phases.

use serde::{Deserialize, Serialize};

/// A loaded source file before chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Path relative to the loaded folder (e.g. `reports/2024.txt`).
    pub source: String,
    /// MIME type the body was extracted from (`text/plain`, `application/pdf`, `text/csv`).
    pub content_type: String,
    /// Extracted plain text.
    pub body: String,
}

/// A chunk of corpus text.
///
/// Identity is positional: `index` is the chunk's position in the persisted
/// chunk list and equals the id of its vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub source: String,
    pub text: String,
}

/// One nearest-neighbour result from [`FlatL2Index::search`](crate::index::FlatL2Index::search).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Sequential vector id (insertion order, starting at 0).
    pub id: usize,
    /// Squared L2 distance to the query.
    pub distance: f32,
}

/// A search hit resolved back to its chunk text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: usize,
    pub distance: f32,
    pub text: String,
}
