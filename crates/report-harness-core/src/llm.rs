//! LLM client contract.
//!
//! A client answers a [`ChatRequest`] either with one completion string or
//! with a [`FragmentStream`] of text deltas. [`collect_stream`] drains a
//! stream into the full text, reporting progress to a [`FragmentSink`] and
//! preserving the partial text when the stream fails midway.
//!
//! The HTTP implementation lives in the `report-harness` app crate; tests
//! use scripted clients.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// One chat-completion request: a system instruction and a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    /// Overrides the client's default model when set.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: clamp_temperature(temperature),
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Clamp into `[0, 1]`; NaN becomes 0.
pub fn clamp_temperature(t: f32) -> f32 {
    if t.is_nan() {
        0.0
    } else {
        t.clamp(0.0, 1.0)
    }
}

/// Ordered text deltas, ending when the model finishes.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single non-streaming completion.
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError>;

    /// Streaming completion.
    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, GenerationError>;
}

/// Receives each fragment as it arrives, together with the text so far.
pub trait FragmentSink {
    fn on_fragment(&mut self, fragment: &str, accumulated: &str);
}

/// Discards fragments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FragmentSink for NullSink {
    fn on_fragment(&mut self, _fragment: &str, _accumulated: &str) {}
}

/// Drain `stream` into one string.
///
/// On a mid-stream error the returned error carries the text received so
/// far (see [`GenerationError::with_partial`]).
pub async fn collect_stream(
    mut stream: FragmentStream,
    sink: &mut dyn FragmentSink,
) -> Result<String, GenerationError> {
    let mut accumulated = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                if fragment.is_empty() {
                    continue;
                }
                accumulated.push_str(&fragment);
                sink.on_fragment(&fragment, &accumulated);
            }
            Err(e) => return Err(e.with_partial(&accumulated)),
        }
    }
    Ok(accumulated)
}

/// Stream a request and collect the full response.
pub async fn stream_text(
    client: &dyn LlmClient,
    request: &ChatRequest,
    sink: &mut dyn FragmentSink,
) -> Result<String, GenerationError> {
    let stream = client.stream(request).await?;
    collect_stream(stream, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::stream;

    struct Recorder(Vec<(String, String)>);

    impl FragmentSink for Recorder {
        fn on_fragment(&mut self, fragment: &str, accumulated: &str) {
            self.0.push((fragment.to_string(), accumulated.to_string()));
        }
    }

    #[test]
    fn test_temperature_clamped() {
        assert_eq!(ChatRequest::new("s", "u", 1.7).temperature, 1.0);
        assert_eq!(ChatRequest::new("s", "u", -0.2).temperature, 0.0);
        assert_eq!(ChatRequest::new("s", "u", f32::NAN).temperature, 0.0);
        assert_eq!(ChatRequest::new("s", "u", 0.8).temperature, 0.8);
    }

    #[test]
    fn test_collect_stream_reports_accumulated() {
        let s: FragmentStream = Box::pin(stream::iter(vec![
            Ok("你".to_string()),
            Ok(String::new()),
            Ok("好".to_string()),
        ]));
        let mut rec = Recorder(Vec::new());
        let text = block_on(collect_stream(s, &mut rec)).unwrap();
        assert_eq!(text, "你好");
        assert_eq!(
            rec.0,
            vec![
                ("你".to_string(), "你".to_string()),
                ("好".to_string(), "你好".to_string())
            ]
        );
    }

    #[test]
    fn test_collect_stream_preserves_partial_on_error() {
        let s: FragmentStream = Box::pin(stream::iter(vec![
            Ok("part".to_string()),
            Err(GenerationError::Transport("reset".to_string())),
            Ok("never".to_string()),
        ]));
        let err = block_on(collect_stream(s, &mut NullSink)).unwrap_err();
        assert_eq!(err.partial_text(), Some("part"));
    }
}
