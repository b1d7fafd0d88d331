//! Error types for the core pipeline.
//!
//! Each stage has its own error so callers can tell a recoverable condition
//! (an interrupted stream with partial text, a degraded parse) from a fatal
//! one (index desync, missing paragraphs at compile time).

use thiserror::Error;

/// Errors raised while splitting text into chunks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    /// The corpus produced no non-empty chunk.
    #[error("chunking produced no chunks: input text is empty")]
    EmptyInput,

    /// `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

/// Errors raised by embedding providers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbeddingError {
    /// The provider cannot be used (disabled, missing key, model not loadable).
    #[error("embedding provider '{provider}' unavailable: {message}")]
    Unavailable { provider: String, message: String },

    /// The provider answered but the payload was unusable.
    #[error("embedding provider '{provider}' returned a bad response: {message}")]
    BadResponse { provider: String, message: String },

    /// A returned vector does not have the configured dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider returned a different number of vectors than inputs.
    #[error("embedding count mismatch: sent {sent} texts, received {received} vectors")]
    CountMismatch { sent: usize, received: usize },
}

/// Errors raised by the flat vector index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt index data: {0}")]
    Corrupt(String),
}

/// Errors raised while retrieving chunks for a query.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetrievalError {
    /// The chunk list and the vector index disagree.
    #[error("chunk list and vector index are out of sync: {chunks} chunks, index references id {max_id}")]
    IndexDesync { chunks: usize, max_id: usize },

    /// The stored chunk digest does not match the chunk list.
    #[error("chunk list digest does not match the digest recorded in the index")]
    DigestMismatch,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Errors raised by an [`LlmClient`](crate::llm::LlmClient).
///
/// `Interrupted` and `Timeout` carry whatever text arrived before the
/// failure so callers can display it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("LLM endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("malformed LLM response: {0}")]
    Malformed(String),

    #[error("LLM stream interrupted after {} chars: {reason}", .partial.chars().count())]
    Interrupted { partial: String, reason: String },

    #[error("LLM call timed out after {after_secs}s ({} chars received)", .partial.chars().count())]
    Timeout { partial: String, after_secs: u64 },
}

impl GenerationError {
    /// Text received before the failure, if any was preserved.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            GenerationError::Interrupted { partial, .. } | GenerationError::Timeout { partial, .. }
                if !partial.is_empty() =>
            {
                Some(partial.as_str())
            }
            _ => None,
        }
    }

    /// Attach the text accumulated so far to a mid-stream failure.
    ///
    /// Errors other than `Timeout` become `Interrupted`.
    pub fn with_partial(self, accumulated: &str) -> Self {
        match self {
            GenerationError::Timeout { after_secs, .. } => GenerationError::Timeout {
                partial: accumulated.to_string(),
                after_secs,
            },
            GenerationError::Interrupted { reason, .. } => GenerationError::Interrupted {
                partial: accumulated.to_string(),
                reason,
            },
            other => GenerationError::Interrupted {
                partial: accumulated.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Why an LLM response could not be parsed into the expected blocks.
///
/// Never returned as an `Err`; it is carried inside a degraded result
/// such as [`ParsedScheme::Unparsed`](crate::parse::ParsedScheme::Unparsed).
#[derive(Debug, Error, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ParseError {
    #[error("marker '{0}' not found in model output")]
    MissingMarker(String),

    #[error("block after '{0}' is empty")]
    EmptyBlock(String),
}

/// Errors raised while substituting paragraphs into the template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompilationError {
    #[error("no paragraph for placeholder(s): {}", .0.join(", "))]
    MissingParagraphs(Vec<String>),
}

/// Errors raised by the [`ReportAssembler`](crate::report::ReportAssembler).
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("step '{step}' requires stage {expected}, but the report is at {found}")]
    InvalidStage {
        step: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("outline could not be parsed ({0}); fix the outline or parse it locally, then retry")]
    SchemeUnparsed(ParseError),

    #[error("unknown placeholder: {0}")]
    UnknownPlaceholder(String),

    #[error("paragraph generation needs a knowledge base; none was attached")]
    NoKnowledgeBase,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

impl ReportError {
    /// Partial model output preserved by an interrupted generation step.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            ReportError::Generation(e) => e.partial_text(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_partial_converts_transport_to_interrupted() {
        let err = GenerationError::Transport("connection reset".into()).with_partial("abc");
        assert_eq!(err.partial_text(), Some("abc"));
        assert!(matches!(err, GenerationError::Interrupted { .. }));
    }

    #[test]
    fn test_with_partial_keeps_timeout() {
        let err = GenerationError::Timeout {
            partial: String::new(),
            after_secs: 5,
        }
        .with_partial("xy");
        assert_eq!(
            err,
            GenerationError::Timeout {
                partial: "xy".into(),
                after_secs: 5
            }
        );
    }

    #[test]
    fn test_partial_text_empty_is_none() {
        let err = GenerationError::Transport("x".into()).with_partial("");
        assert_eq!(err.partial_text(), None);
    }

    #[test]
    fn test_missing_paragraphs_message() {
        let err = CompilationError::MissingParagraphs(vec!["目的".into(), "背景".into()]);
        assert_eq!(err.to_string(), "no paragraph for placeholder(s): 目的, 背景");
    }
}
