//! HTTP chat-completion client.
//!
//! [`HttpLlmClient`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint (ZhipuAI's `open.bigmodel.cn/api/paas/v4` by default). Streaming
//! responses are Server-Sent Events: `data: {json}` lines terminated by
//! `data: [DONE]`, with text deltas at `choices[0].delta.content`.
//!
//! Every call runs under one deadline (`llm.timeout_secs`). When it expires
//! mid-stream the error carries the text received so far. Calls are never
//! retried.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use futures::{Stream, StreamExt};
use tokio::time::Instant;

use report_harness_core::error::GenerationError;
use report_harness_core::llm::{ChatRequest, FragmentStream, LlmClient};

use crate::config::LlmConfig;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    vision_model: String,
    timeout_secs: u64,
}

impl HttpLlmClient {
    /// Build a client from `[llm]`. Fails if the API key variable is unset.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            vision_model: config.vision_model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn timeout_error(&self) -> GenerationError {
        GenerationError::Timeout {
            partial: String::new(),
            after_secs: self.timeout_secs,
        }
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let mut messages = Vec::new();
        if !request.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": request.system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.user}));

        serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    /// Send `body` and return the response once its status is known to be 2xx.
    async fn send(
        &self,
        body: &serde_json::Value,
        deadline: Instant,
    ) -> Result<reqwest::Response, GenerationError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = body["model"].as_str().unwrap_or_default(),
            stream = body["stream"].as_bool().unwrap_or(false),
            "sending chat request"
        );

        let send = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send();
        let response = tokio::time::timeout_at(deadline, send)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = tokio::time::timeout_at(deadline, response.text())
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default();
            let preview: String = text.chars().take(300).collect();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: preview,
            });
        }
        Ok(response)
    }

    async fn complete_body(&self, body: serde_json::Value) -> Result<String, GenerationError> {
        let deadline = Instant::now() + Duration::from_secs(self.timeout_secs);
        let response = self.send(&body, deadline).await?;
        let json: serde_json::Value = tokio::time::timeout_at(deadline, response.json())
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GenerationError::Malformed("missing choices[0].message.content".into()))
    }

    /// Ask the vision model about an image (table extraction).
    pub async fn complete_with_image(
        &self,
        prompt: &str,
        image: &[u8],
        mime: &str,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "model": self.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": format!("data:{};base64,{}", mime, encoded)}},
                    {"type": "text", "text": prompt},
                ],
            }],
            "temperature": report_harness_core::llm::clamp_temperature(temperature),
            "stream": false,
        });
        self.complete_body(body).await
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        self.complete_body(self.body(request, false)).await
    }

    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, GenerationError> {
        let deadline = Instant::now() + Duration::from_secs(self.timeout_secs);
        let response = self.send(&self.body(request, true), deadline).await?;

        let bytes: ByteStream = Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec())));
        Ok(SseState::new(bytes, deadline, self.timeout_secs).into_fragments())
    }
}

struct SseState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, GenerationError>>,
    finished: bool,
    saw_done: bool,
    deadline: Instant,
    timeout_secs: u64,
}

async fn next_fragment(
    mut st: SseState,
) -> Option<(Result<String, GenerationError>, SseState)> {
    loop {
        if let Some(item) = st.pending.pop_front() {
            return Some((item, st));
        }
        if st.finished {
            return None;
        }

        match tokio::time::timeout_at(st.deadline, st.bytes.next()).await {
            Err(_) => {
                st.finished = true;
                let err = GenerationError::Timeout {
                    partial: String::new(),
                    after_secs: st.timeout_secs,
                };
                return Some((Err(err), st));
            }
            Ok(Some(Err(e))) => {
                st.finished = true;
                return Some((Err(GenerationError::Transport(e.to_string())), st));
            }
            Ok(None) => {
                let tail = st.decoder.finish();
                st.enqueue(tail);
                if !st.saw_done && !st.finished {
                    st.pending.push_back(Err(GenerationError::Interrupted {
                        partial: String::new(),
                        reason: "stream ended before [DONE]".into(),
                    }));
                }
                st.finished = true;
            }
            Ok(Some(Ok(bytes))) => {
                let events = st.decoder.push(&bytes);
                st.enqueue(events);
            }
        }
    }
}

impl SseState {
    fn new(bytes: ByteStream, deadline: Instant, timeout_secs: u64) -> Self {
        Self {
            bytes,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
            saw_done: false,
            deadline,
            timeout_secs,
        }
    }

    fn into_fragments(self) -> FragmentStream {
        Box::pin(futures::stream::unfold(self, next_fragment))
    }

    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.pending.push_back(Ok(text)),
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(GenerationError::Malformed(message)));
                    self.finished = true;
                    return;
                }
                SseEvent::Done => {
                    self.saw_done = true;
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// One decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Error(String),
    Done,
}

/// Incremental SSE line decoder.
///
/// Bytes are buffered until a full line arrives, so multi-byte UTF-8
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "skipping undecodable SSE line");
            return None;
        }
    };
    if let Some(err) = parsed.get("error") {
        let message = err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Some(SseEvent::Error(message));
    }

    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| SseEvent::Delta(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use report_harness_core::llm::{collect_stream, NullSink};

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": text}}]})
        )
    }

    #[test]
    fn test_decoder_yields_deltas_and_done() {
        let mut decoder = SseDecoder::default();
        let payload = format!("{}{}data: [DONE]\n\n", delta("报告"), delta("正文"));
        let events = decoder.push(payload.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Delta("报告".into()),
                SseEvent::Delta("正文".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn test_decoder_handles_split_multibyte_chars() {
        let mut decoder = SseDecoder::default();
        let payload = delta("总述");
        let bytes = payload.as_bytes();
        // Split inside the UTF-8 encoding of the first character.
        let cut = payload.find('总').unwrap() + 1;
        assert!(decoder.push(&bytes[..cut]).is_empty());
        assert_eq!(decoder.push(&bytes[cut..]), vec![SseEvent::Delta("总述".into())]);
    }

    #[test]
    fn test_decoder_ignores_comments_and_empty_deltas() {
        let mut decoder = SseDecoder::default();
        let payload = format!(": keep-alive\n\n{}event: ping\n", delta(""));
        assert!(decoder.push(payload.as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_reports_inline_errors() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"error\":{\"code\":\"1301\",\"message\":\"blocked\"}}\n");
        assert_eq!(events, vec![SseEvent::Error("blocked".into())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Done]);
    }

    fn byte_stream(parts: Vec<String>) -> ByteStream {
        Box::pin(futures::stream::iter(
            parts.into_iter().map(|p| Ok(p.into_bytes())),
        ))
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_stream_with_done_completes() {
        let parts = vec![delta("报告"), delta("正文"), "data: [DONE]\n\n".to_string()];
        let stream = SseState::new(byte_stream(parts), far_deadline(), 60).into_fragments();
        let text = collect_stream(stream, &mut NullSink).await.unwrap();
        assert_eq!(text, "报告正文");
    }

    #[tokio::test]
    async fn test_stream_closed_before_done_is_interrupted() {
        let parts = vec![delta("部分")];
        let stream = SseState::new(byte_stream(parts), far_deadline(), 60).into_fragments();
        let err = collect_stream(stream, &mut NullSink).await.unwrap_err();
        assert!(matches!(err, GenerationError::Interrupted { .. }));
        assert_eq!(err.partial_text(), Some("部分"));
    }

    #[tokio::test]
    async fn test_stream_done_without_trailing_newline() {
        let parts = vec![delta("完"), "data: [DONE]".to_string()];
        let stream = SseState::new(byte_stream(parts), far_deadline(), 60).into_fragments();
        assert_eq!(collect_stream(stream, &mut NullSink).await.unwrap(), "完");
    }

    #[test]
    fn test_request_body_uses_override_model() {
        std::env::set_var("RH_TEST_LLM_KEY", "k");
        let client = HttpLlmClient::new(&LlmConfig {
            api_key_env: "RH_TEST_LLM_KEY".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        assert!(client.endpoint.ends_with("/api/paas/v4/chat/completions"));

        let req = ChatRequest::new("", "问题", 0.5).with_model(Some("glm-4-long".into()));
        let body = client.body(&req, true);
        assert_eq!(body["model"], "glm-4-long");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let cfg = LlmConfig {
            api_key_env: "RH_TEST_UNSET_KEY_VAR".into(),
            ..LlmConfig::default()
        };
        assert!(HttpLlmClient::new(&cfg).is_err());
    }
}
