//! TOML configuration.
//!
//! Every section is optional; missing keys take the defaults below. See
//! `config/rh.example.toml` for a complete file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use report_harness_core::chunk::ChunkConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunk_config(&self) -> ChunkConfig {
        ChunkConfig::new(self.chunk_size, self.chunk_overlap)
    }
}

fn default_chunk_size() -> usize {
    200
}
fn default_chunk_overlap() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key (`openai` provider).
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Outline drafting, paragraphs, answers, cleanup.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Scheme parsing and optimization.
    #[serde(default = "default_long_model")]
    pub long_model: String,
    /// Table extraction from images.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            long_model: default_long_model(),
            vision_model: default_vision_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://open.bigmodel.cn/api/paas/v4".to_string()
}
fn default_llm_model() -> String {
    "glm-4-plus".to_string()
}
fn default_long_model() -> String {
    "glm-4-long".to_string()
}
fn default_vision_model() -> String {
    "glm-4v-plus".to_string()
}
fn default_llm_api_key_env() -> String {
    "ZHIPUAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// Directory holding one set of `<title>.*` files per report.
    #[serde(default = "default_report_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    /// Subject area the model writes as an expert in.
    #[serde(default)]
    pub domain: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_report_dir(),
            window_chars: default_window_chars(),
            domain: String::new(),
        }
    }
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("./reports")
}
fn default_window_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
        "**/*.csv".to_string(),
    ]
}

impl Config {
    /// Defaults for every section, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_config_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::minimal())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate llm
    if !(0.0..=1.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 1.0]");
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    // Validate report
    if config.report.window_chars == 0 {
        bail!("report.window_chars must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "hash" | "local" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0");
            }
        }
        "disabled" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hash.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 200);
        assert_eq!(cfg.chunking.chunk_overlap, 30);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.llm.model, "glm-4-plus");
        assert_eq!(cfg.llm.long_model, "glm-4-long");
        assert_eq!(cfg.llm.api_key_env, "ZHIPUAI_API_KEY");
        assert_eq!(cfg.report.window_chars, 1500);
        assert_eq!(cfg.loader.include_globs.len(), 3);
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[chunking]
chunk_size = 300
chunk_overlap = 50

[retrieval]
top_k = 8

[embedding]
provider = "openai"
model = "embedding-3"
dims = 2048
url = "https://open.bigmodel.cn/api/paas/v4"
api_key_env = "ZHIPUAI_API_KEY"

[llm]
temperature = 0.3
timeout_secs = 60

[report]
dir = "./out"
domain = "区域经济"
"#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.to_chunk_config().chunk_size, 300);
        assert_eq!(cfg.retrieval.top_k, 8);
        assert_eq!(cfg.embedding.dims, Some(2048));
        assert_eq!(cfg.llm.timeout_secs, 60);
        assert_eq!(cfg.report.dir, PathBuf::from("./out"));
        assert_eq!(cfg.report.domain, "区域经济");
    }

    #[test]
    fn test_validation_errors() {
        assert!(parse_config("[chunking]\nchunk_size = 0").is_err());
        assert!(parse_config("[chunking]\nchunk_size = 10\nchunk_overlap = 10").is_err());
        assert!(parse_config("[llm]\ntemperature = 1.5").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"").is_err());
        assert!(parse_config("[embedding]\nprovider = \"bogus\"").is_err());
        assert!(parse_config("[report]\nwindow_chars = 0").is_err());
        assert!(parse_config("[embedding]\nprovider = \"hash\"").is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_minimal() {
        let cfg = load_config_or_minimal(Path::new("/nonexistent/rh.toml")).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!(load_config(Path::new("/nonexistent/rh.toml")).is_err());
    }
}
