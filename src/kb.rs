//! Knowledge-base commands: `rh kb build|search|ask`.
//!
//! A knowledge base for folder `<parent>/<name>` is stored next to it as two
//! files:
//!
//! | File | Contents |
//! |------|----------|
//! | `<parent>/<name>_chunks.json` | JSON array of chunk texts, in id order |
//! | `<parent>/<name>_index.bin` | flat L2 index with the chunk-list digest |
//!
//! A build is skipped when both files exist unless `--force` is given.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use report_harness_core::chunk::{chunk_corpus, Chunker};
use report_harness_core::embedding::EmbeddingProvider;
use report_harness_core::index::FlatL2Index;
use report_harness_core::llm::stream_text;
use report_harness_core::prompts::rag_answer_request;
use report_harness_core::retrieve::{KnowledgeBase, Retriever};

use crate::config::Config;
use crate::embedding::{create_provider, embed_in_batches};
use crate::llm::HttpLlmClient;
use crate::loader::load_folder;
use crate::progress::{BuildEvent, ProgressMode};

/// On-disk locations of one knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbPaths {
    pub name: String,
    pub chunks: PathBuf,
    pub index: PathBuf,
}

impl KbPaths {
    pub fn for_folder(folder: &Path) -> Result<Self> {
        let resolved;
        let folder = if folder.file_name().is_some() {
            folder
        } else {
            resolved = folder
                .canonicalize()
                .with_context(|| format!("Failed to resolve folder: {}", folder.display()))?;
            resolved.as_path()
        };
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Folder has no name: {}", folder.display()))?;
        let parent = folder
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        Ok(Self {
            chunks: parent.join(format!("{}_chunks.json", name)),
            index: parent.join(format!("{}_index.bin", name)),
            name,
        })
    }

    pub fn exists(&self) -> bool {
        self.chunks.is_file() && self.index.is_file()
    }
}

/// Load, chunk, embed and persist the documents under `folder`.
pub async fn run_kb_build(
    config: &Config,
    folder: &Path,
    force: bool,
    progress: ProgressMode,
) -> Result<()> {
    let paths = KbPaths::for_folder(folder)?;
    if paths.exists() && !force {
        println!("kb {}", paths.name);
        println!("  already built: {}", paths.index.display());
        println!("  (use --force to rebuild)");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in the config.");
    }
    let provider = create_provider(&config.embedding)?;

    let docs = load_folder(folder, &config.loader)
        .with_context(|| format!("Failed to load documents from {}", folder.display()))?;
    if docs.is_empty() {
        bail!(
            "No documents matched {:?} under {}",
            config.loader.include_globs,
            folder.display()
        );
    }
    progress.report(&paths.name, BuildEvent::Loaded { documents: docs.len() });

    let chunker = Chunker::new(config.chunking.to_chunk_config())?;
    let chunks: Vec<String> = chunk_corpus(&docs, &chunker)?
        .into_iter()
        .map(|c| c.text)
        .collect();
    progress.report(&paths.name, BuildEvent::Chunked { chunks: chunks.len() });

    let vectors = embed_in_batches(
        provider.as_ref(),
        &chunks,
        config.embedding.batch_size,
        |n, total| progress.report(&paths.name, BuildEvent::Embedding { n, total }),
    )
    .await?;

    let mut index = FlatL2Index::new(provider.dims());
    index.add(&vectors)?;
    let kb = KnowledgeBase::from_parts(chunks, index);

    let chunks_json = serde_json::to_string_pretty(&kb.chunks)?;
    std::fs::write(&paths.chunks, chunks_json)
        .with_context(|| format!("Failed to write {}", paths.chunks.display()))?;
    std::fs::write(&paths.index, kb.index.encode(&kb.digest()))
        .with_context(|| format!("Failed to write {}", paths.index.display()))?;

    tracing::info!(kb = %paths.name, documents = docs.len(), chunks = kb.len(), "knowledge base built");

    println!("kb {}", paths.name);
    println!("  documents: {}", docs.len());
    println!("  chunks: {}", kb.len());
    println!("  model: {} ({} dims)", provider.model_name(), provider.dims());
    println!("  chunks file: {}", paths.chunks.display());
    println!("  index file: {}", paths.index.display());
    println!("ok");

    Ok(())
}

/// Read a persisted knowledge base and verify the chunk list against the
/// index header.
pub fn load_knowledge_base(folder: &Path) -> Result<KnowledgeBase> {
    let paths = KbPaths::for_folder(folder)?;
    if !paths.exists() {
        bail!(
            "Knowledge base '{}' not built. Run: rh kb build {}",
            paths.name,
            folder.display()
        );
    }

    let chunks_json = std::fs::read_to_string(&paths.chunks)
        .with_context(|| format!("Failed to read {}", paths.chunks.display()))?;
    let chunks: Vec<String> = serde_json::from_str(&chunks_json)
        .with_context(|| format!("Invalid chunk list: {}", paths.chunks.display()))?;
    let bytes = std::fs::read(&paths.index)
        .with_context(|| format!("Failed to read {}", paths.index.display()))?;
    let decoded = FlatL2Index::decode(&bytes)
        .with_context(|| format!("Invalid index: {}", paths.index.display()))?;

    let kb = KnowledgeBase::from_parts(chunks, decoded.index);
    kb.verify(&decoded.chunk_digest).with_context(|| {
        format!(
            "Knowledge base '{}' is inconsistent; rebuild with --force",
            paths.name
        )
    })?;
    tracing::debug!(kb = %paths.name, chunks = kb.len(), dims = kb.index.dims(), "knowledge base loaded");
    Ok(kb)
}

/// Create the configured embedder and check it matches the index.
pub fn query_embedder(config: &Config, kb: &KnowledgeBase) -> Result<Box<dyn EmbeddingProvider>> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in the config.");
    }
    let provider = create_provider(&config.embedding)?;
    if provider.dims() != kb.index.dims() {
        bail!(
            "Embedding model '{}' produces {} dims but the index holds {}-dim vectors; rebuild with --force",
            provider.model_name(),
            provider.dims(),
            kb.index.dims()
        );
    }
    Ok(provider)
}

/// Print the `k` chunks nearest to `query`.
pub async fn run_kb_search(config: &Config, folder: &Path, query: &str, k: Option<usize>) -> Result<()> {
    let kb = load_knowledge_base(folder)?;
    let provider = query_embedder(config, &kb)?;
    let k = k.unwrap_or(config.retrieval.top_k);

    let retrieval = Retriever::new(provider.as_ref(), &kb).retrieve(query, k).await?;
    if retrieval.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in retrieval.chunks.iter().enumerate() {
        println!("{}. [{:.4}] chunk {}", i + 1, hit.distance, hit.id);
        for line in hit.text.lines() {
            println!("    {}", line);
        }
        println!();
    }
    Ok(())
}

/// Retrieve context for `question` and stream an expert answer.
pub async fn run_kb_ask(
    config: &Config,
    folder: &Path,
    question: &str,
    k: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let kb = load_knowledge_base(folder)?;
    let provider = query_embedder(config, &kb)?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let retrieval = Retriever::new(provider.as_ref(), &kb).retrieve(question, k).await?;

    let client = HttpLlmClient::new(&config.llm)?;
    let request = rag_answer_request(
        &config.report.domain,
        question,
        &retrieval.joined(),
        config.llm.temperature,
    );
    let mut sink = progress.sink("answer");
    match stream_text(&client, &request, sink.as_mut()).await {
        Ok(answer) => {
            println!("{}", answer.trim());
            Ok(())
        }
        Err(e) => {
            if let Some(partial) = e.partial_text() {
                println!("{}", partial);
            }
            Err(e).context("Answer generation failed")
        }
    }
}
