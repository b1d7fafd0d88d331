//! Concrete embedding providers.
//!
//! Implements the core [`EmbeddingProvider`] trait for:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: any OpenAI-compatible `/embeddings` endpoint
//!   (OpenAI, ZhipuAI `embedding-3`, ...), with retry and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: fastembed, behind the `local-embeddings-fastembed` feature.
//! - **`hash`**: the offline [`HashEmbedder`] from the core crate.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use report_harness_core::embedding::{check_dims, EmbeddingProvider, HashEmbedder};
use report_harness_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_HASH_DIMS: usize = 256;

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`. Every call fails.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable {
            provider: "disabled".into(),
            message: "set [embedding] provider in the config to build or query a knowledge base"
                .into(),
        })
    }
}

// ============ Shared HTTP plumbing ============

/// Settings shared by the HTTP-backed providers.
struct HttpSettings {
    provider: &'static str,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpSettings {
    fn new(provider: &'static str, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            provider,
            client,
            max_retries: config.max_retries,
        })
    }

    fn unavailable(&self, message: impl Into<String>) -> EmbeddingError {
        EmbeddingError::Unavailable {
            provider: self.provider.into(),
            message: message.into(),
        }
    }

    fn bad_response(&self, message: impl Into<String>) -> EmbeddingError {
        EmbeddingError::BadResponse {
            provider: self.provider.into(),
            message: message.into(),
        }
    }

    /// POST `body` to `url`, retrying transient failures, and return the
    /// decoded JSON response.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, EmbeddingError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(provider = self.provider, attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = client_post(&self.client, url).json(body);
            if let Some(key) = bearer {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| self.bad_response(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = format!("API error {}: {}", status, body_text);

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(provider = self.provider, %status, "transient embedding error");
                        last_err = Some(self.unavailable(message));
                        continue;
                    }

                    return Err(self.bad_response(message));
                }
                Err(e) => {
                    last_err = Some(self.unavailable(format!("connection error ({}): {}", url, e)));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| self.unavailable("embedding failed after retries")))
    }
}

fn client_post(client: &reqwest::Client, url: &str) -> reqwest::RequestBuilder {
    client.post(url).header("Content-Type", "application/json")
}

/// A JSON array of numbers as a vector; `None` if any element is not a number.
fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn check_batch(dims: usize, sent: usize, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
    if vectors.len() != sent {
        return Err(EmbeddingError::CountMismatch {
            sent,
            received: vectors.len(),
        });
    }
    vectors.iter().try_for_each(|v| check_dims(dims, v))
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible APIs.
///
/// Calls `POST {url}/embeddings` with the configured model. The key is read
/// from the variable named by `api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    http: HttpSettings,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let key_env = config
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_KEY_ENV);
        let api_key = match std::env::var(key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", key_env),
        };
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            dims,
            url,
            api_key,
            http: HttpSettings::new("openai", config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post_json(&format!("{}/embeddings", self.url), Some(&self.api_key), &body)
            .await?;
        let vectors = parse_openai_response(&json).map_err(|m| self.http.bad_response(m))?;
        check_batch(self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("missing data array")?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or("missing or non-numeric embedding")?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    http: HttpSettings,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            dims,
            url,
            http: HttpSettings::new("ollama", config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post_json(&format!("{}/api/embed", self.url), None, &body)
            .await?;
        let vectors = parse_ollama_response(&json).map_err(|m| self.http.bad_response(m))?;
        check_batch(self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, String> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or("missing embeddings array")?;

    embeddings
        .iter()
        .map(|e| json_vector(e).ok_or_else(|| "embedding is not a numeric array".to_string()))
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Local inference via fastembed. Models download from Hugging Face on
/// first use and run offline afterwards.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-small-zh-v1.5" => 512,
            "multilingual-e5-small" => 384,
            "multilingual-e5-base" => 768,
            "multilingual-e5-large" => 1024,
            _ => 384,
        });
        let fastembed_model = match model_name.as_str() {
            "bge-small-zh-v1.5" => fastembed::EmbeddingModel::BGESmallZHV15,
            "multilingual-e5-small" => fastembed::EmbeddingModel::MultilingualE5Small,
            "multilingual-e5-base" => fastembed::EmbeddingModel::MultilingualE5Base,
            "multilingual-e5-large" => fastembed::EmbeddingModel::MultilingualE5Large,
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 bge-small-zh-v1.5, multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: std::sync::Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let owned = texts.to_vec();
        let bad = |message: String| EmbeddingError::BadResponse {
            provider: "local".into(),
            message,
        };

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|e| e.to_string())?;
            guard.embed(owned, Some(batch_size)).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| bad(e.to_string()))?
        .map_err(bad)?;

        check_batch(self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (needs `local-embeddings-fastembed`) |
/// | `"hash"` | [`HashEmbedder`] (offline, deterministic) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "hash" => Ok(Box::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed `texts` in batches of `batch_size`, reporting progress after
/// each batch. Output order matches input order.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    mut on_batch: impl FnMut(usize, usize),
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let mut out = provider.embed(batch).await?;
        check_batch(provider.dims(), batch.len(), &out)?;
        vectors.append(&mut out);
        on_batch(vectors.len(), texts.len());
    }
    Ok(vectors)
}
