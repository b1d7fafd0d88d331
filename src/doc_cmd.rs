//! `rh doc clean`: strip PDF conversion debris before a file joins a corpus.
//!
//! Each PDF's text layer is extracted, passed through the cleanup prompt
//! (page numbers, running headers and footers removed, split paragraphs
//! rejoined) and written to `<out>/<stem>.txt`, ready for `rh kb build`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use report_harness_core::llm::{stream_text, LlmClient};
use report_harness_core::prompts::pdf_cleanup_request;

use crate::config::Config;
use crate::llm::HttpLlmClient;
use crate::loader::extract_pdf;
use crate::progress::ProgressMode;

/// Output path for a cleaned PDF.
pub fn cleaned_path(out_dir: &Path, pdf: &Path) -> Result<PathBuf> {
    let stem = pdf
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("Not a file: {}", pdf.display()))?;
    Ok(out_dir.join(format!("{}.txt", stem.to_string_lossy())))
}

pub async fn run_doc_clean(
    config: &Config,
    pdfs: &[PathBuf],
    out_dir: &Path,
    progress: ProgressMode,
) -> Result<()> {
    if pdfs.is_empty() {
        bail!("No PDF files given");
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let client = HttpLlmClient::new(&config.llm)?;

    println!("doc clean");
    for pdf in pdfs {
        let path = clean_one(&client, config.llm.temperature, pdf, out_dir, progress).await?;
        println!("  {} -> {}", pdf.display(), path.display());
    }
    println!("ok");
    Ok(())
}

async fn clean_one(
    client: &dyn LlmClient,
    temperature: f32,
    pdf: &Path,
    out_dir: &Path,
    progress: ProgressMode,
) -> Result<PathBuf> {
    let bytes = std::fs::read(pdf).with_context(|| format!("Failed to read {}", pdf.display()))?;
    let text = extract_pdf(pdf, &bytes)?;
    if text.trim().is_empty() {
        bail!("{} has no text layer", pdf.display());
    }
    tracing::debug!(pdf = %pdf.display(), chars = text.chars().count(), "extracted PDF text");

    let out = cleaned_path(out_dir, pdf)?;
    let request = pdf_cleanup_request(&text, temperature);
    let mut sink = progress.sink(&format!("clean {}", pdf.display()));
    match stream_text(client, &request, sink.as_mut()).await {
        Ok(cleaned) => {
            std::fs::write(&out, cleaned.trim())
                .with_context(|| format!("Failed to write {}", out.display()))?;
            Ok(out)
        }
        Err(e) => {
            if let Some(partial) = e.partial_text() {
                let partial_path = out.with_extension("partial.txt");
                std::fs::write(&partial_path, partial)
                    .with_context(|| format!("Failed to write {}", partial_path.display()))?;
                eprintln!("partial output saved to {}", partial_path.display());
            }
            Err(e).with_context(|| format!("Cleanup of {} failed", pdf.display()))
        }
    }
}
