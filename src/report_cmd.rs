//! Report commands: `rh report outline|parse|paragraphs|compile|optimize|run|status`.
//!
//! Each report lives in `report.dir` as a set of files named after its title.
//! `<title>.state.json` holds the full [`ReportState`] and is the source of
//! truth; the other files are written from it after every step so they can
//! be read (and the outline edited) by hand:
//!
//! | File | Contents |
//! |------|----------|
//! | `<title>.outline.txt` | outline; edits are picked up by `report parse` |
//! | `<title>.template.txt` | parsed template with `{name}` placeholders |
//! | `<title>.placeholders.txt` | placeholder names, one per line |
//! | `<title>.paragraphs.json` | paragraph text by placeholder |
//! | `<title>.draft.txt` | compiled draft |
//! | `<title>.optimized.txt` | title, blank line, optimized report |
//! | `<title>.partial.txt` | output of the last interrupted step |
//! | `<title>.html` | page written by `rh report export` |
//!
//! Steps run one at a time and the state is saved after each, so an
//! interrupted run resumes from the last completed paragraph or window.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use report_harness_core::compile::window_count;
use report_harness_core::error::ReportError;
use report_harness_core::parse::ParsedScheme;
use report_harness_core::report::{
    compile, parse_outline_locally, ReportAssembler, ReportRequest, ReportStage, ReportState,
};
use report_harness_core::retrieve::Retriever;

use crate::config::Config;
use crate::kb::{load_knowledge_base, query_embedder};
use crate::llm::HttpLlmClient;
use crate::progress::ProgressMode;

/// The files of one report.
#[derive(Debug, Clone)]
pub struct ReportWorkspace {
    dir: PathBuf,
    stem: String,
    title: String,
}

impl ReportWorkspace {
    pub fn new(dir: &Path, title: &str) -> Result<Self> {
        let stem = file_stem(title);
        if stem.is_empty() {
            bail!("Report title must not be empty");
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            stem,
            title: title.trim().to_string(),
        })
    }

    pub fn path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, kind))
    }

    pub fn state_path(&self) -> PathBuf {
        self.path("state.json")
    }

    /// Saved state, or a fresh one built from the config.
    pub fn load_or_new(&self, config: &Config) -> Result<ReportState> {
        match self.load()? {
            Some(state) => Ok(state),
            None => Ok(ReportState::new(new_request(config, &self.title))),
        }
    }

    pub fn load(&self) -> Result<Option<ReportState>> {
        let path = self.state_path();
        if !path.is_file() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&json)
            .with_context(|| format!("Invalid report state: {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn require(&self) -> Result<ReportState> {
        self.load()?.ok_or_else(|| {
            anyhow::anyhow!(
                "No report named '{}' in {}. Start with: rh report outline --title \"{}\"",
                self.title,
                self.dir.display(),
                self.title
            )
        })
    }

    /// Write the state and every file derived from it.
    pub fn save(&self, state: &ReportState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        self.write("state.json", Some(serde_json::to_string_pretty(state)?))?;

        self.write("outline.txt", state.outline.clone())?;
        let (template, placeholders) = match &state.scheme {
            Some(ParsedScheme::Parsed {
                template,
                placeholders,
            }) => (Some(template.clone()), Some(placeholders.join("\n"))),
            _ => (None, None),
        };
        self.write("template.txt", template)?;
        self.write("placeholders.txt", placeholders)?;
        let paragraphs = if state.paragraphs.is_empty() {
            None
        } else {
            Some(serde_json::to_string_pretty(&state.paragraphs)?)
        };
        self.write("paragraphs.json", paragraphs)?;
        self.write("draft.txt", state.draft.clone())?;
        self.write(
            "optimized.txt",
            state
                .final_report()
                .map(|report| format!("{}\n\n{}", state.request.title, report)),
        )?;
        tracing::debug!(title = %self.title, stage = %state.stage, "report state saved");
        Ok(())
    }

    pub fn save_partial(&self, text: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path("partial.txt");
        std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Write `content` to `<stem>.<kind>`, or remove the file when `None`.
    fn write(&self, kind: &str, content: Option<String>) -> Result<()> {
        let path = self.path(kind);
        match content {
            Some(text) => std::fs::write(&path, text)
                .with_context(|| format!("Failed to write {}", path.display())),
            None => match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    Err(e).with_context(|| format!("Failed to remove {}", path.display()))
                }
                _ => Ok(()),
            },
        }
    }

    /// Save a finished step, or keep the partial output of a failed one.
    fn settle(&self, result: Result<ReportState, ReportError>, step: &str) -> Result<ReportState> {
        match result {
            Ok(state) => {
                self.save(&state)?;
                Ok(state)
            }
            Err(e) => {
                if let Some(partial) = e.partial_text() {
                    let path = self.save_partial(partial)?;
                    eprintln!("partial output saved to {}", path.display());
                }
                Err(e).with_context(|| format!("report {}: {} failed", self.title, step))
            }
        }
    }
}

/// Title as a file-name stem: path separators and reserved characters
/// become `_`.
pub fn file_stem(title: &str) -> String {
    title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn new_request(config: &Config, title: &str) -> ReportRequest {
    let mut request = ReportRequest::new(title);
    request.domain = config.report.domain.clone();
    request.temperature = config.llm.temperature;
    request.top_k = config.retrieval.top_k;
    request.window_chars = config.report.window_chars;
    request.long_model = Some(config.llm.long_model.clone());
    request
}

pub(crate) fn workspace(config: &Config, title: &str) -> Result<ReportWorkspace> {
    ReportWorkspace::new(&config.report.dir, title)
}

/// Draft the outline and print it.
pub async fn run_outline(
    config: &Config,
    title: &str,
    requirements: Option<String>,
    progress: ProgressMode,
) -> Result<()> {
    let ws = workspace(config, title)?;
    let mut state = ws.load_or_new(config)?;
    if let Some(requirements) = requirements {
        state.request.requirements = requirements;
    }

    let client = HttpLlmClient::new(&config.llm)?;
    let asm = ReportAssembler::new(&client);
    let mut sink = progress.sink("outline");
    let state = ws.settle(asm.draft_outline(&state, sink.as_mut()).await, "outline")?;

    println!("{}", state.outline.as_deref().unwrap_or(""));
    eprintln!(
        "outline saved to {}; edit it, then run: rh report parse --title \"{}\"",
        ws.path("outline.txt").display(),
        ws.title
    );
    Ok(())
}

/// Parse the outline into a template, with the LLM or locally.
pub async fn run_parse(config: &Config, title: &str, local: bool, progress: ProgressMode) -> Result<()> {
    let ws = workspace(config, title)?;
    let state = with_edited_outline(&ws, ws.require()?)?;

    let state = if local {
        ws.settle(parse_outline_locally(&state), "parse")?
    } else {
        let client = HttpLlmClient::new(&config.llm)?;
        let asm = ReportAssembler::new(&client);
        let mut sink = progress.sink("parse");
        ws.settle(asm.parse_outline(&state, sink.as_mut()).await, "parse")?
    };

    print_scheme(&ws, &state);
    Ok(())
}

/// Pick up hand edits to `<title>.outline.txt`.
fn with_edited_outline(ws: &ReportWorkspace, state: ReportState) -> Result<ReportState> {
    let path = ws.path("outline.txt");
    if !path.is_file() {
        return Ok(state);
    }
    let on_disk = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if state.outline.as_deref() == Some(on_disk.as_str()) {
        return Ok(state);
    }
    tracing::info!(path = %path.display(), "using edited outline");
    Ok(state.with_outline(on_disk))
}

fn print_scheme(ws: &ReportWorkspace, state: &ReportState) {
    match &state.scheme {
        Some(ParsedScheme::Parsed { placeholders, .. }) => {
            println!("report {}", ws.title);
            println!("  placeholders: {}", placeholders.len());
            for name in placeholders {
                println!("    {}", name);
            }
            println!("  template: {}", ws.path("template.txt").display());
        }
        Some(ParsedScheme::Unparsed { reason, .. }) => {
            println!("report {}", ws.title);
            println!("  scheme: unparsed ({})", reason);
            eprintln!(
                "edit {} and parse again, or use --local",
                ws.path("outline.txt").display()
            );
        }
        None => {}
    }
}

/// Write missing paragraphs (or just `only`), saving after each one.
pub async fn run_paragraphs(
    config: &Config,
    title: &str,
    kb_folder: &Path,
    only: Option<String>,
    progress: ProgressMode,
) -> Result<()> {
    let ws = workspace(config, title)?;
    let mut state = ws.require()?;

    let names = match only {
        Some(name) => vec![name],
        None => state.missing_paragraphs(),
    };
    if names.is_empty() {
        println!("report {}", ws.title);
        println!("  all {} paragraphs written", state.paragraphs.len());
        return Ok(());
    }

    let kb = load_knowledge_base(kb_folder)?;
    let provider = query_embedder(config, &kb)?;
    let client = HttpLlmClient::new(&config.llm)?;
    let asm = ReportAssembler::new(&client).with_retriever(Retriever::new(provider.as_ref(), &kb));

    println!("report {}", ws.title);
    for name in &names {
        let mut sink = progress.sink(&format!("paragraph {}", name));
        let result = asm.generate_paragraph(&state, name, sink.as_mut()).await;
        state = ws.settle(result, &format!("paragraph '{}'", name))?;
        println!("  written: {}", name);
    }
    println!("  stage: {}", state.stage);
    Ok(())
}

/// Substitute paragraphs into the template.
pub fn run_compile(config: &Config, title: &str) -> Result<()> {
    let ws = workspace(config, title)?;
    let state = ws.settle(compile(&ws.require()?), "compile")?;
    let draft = state.draft.as_deref().unwrap_or("");

    println!("report {}", ws.title);
    println!("  draft: {} chars", draft.chars().count());
    println!(
        "  windows: {}",
        window_count(draft, state.request.window_chars)
    );
    println!("  file: {}", ws.path("draft.txt").display());
    Ok(())
}

/// Optimize the next window, or all remaining windows with `all`.
pub async fn run_optimize(config: &Config, title: &str, all: bool, progress: ProgressMode) -> Result<()> {
    let ws = workspace(config, title)?;
    let mut state = ws.require()?;
    let client = HttpLlmClient::new(&config.llm)?;
    let asm = ReportAssembler::new(&client);

    println!("report {}", ws.title);
    loop {
        let mut sink = progress.sink("optimize");
        let result = asm.optimize_next_window(&state, sink.as_mut()).await;
        state = ws.settle(result, "optimize")?;
        println!("  {}", state.stage);
        if !all || state.stage == ReportStage::Optimized {
            break;
        }
    }
    if state.stage == ReportStage::Optimized {
        println!("  file: {}", ws.path("optimized.txt").display());
    }
    Ok(())
}

/// Run every step, resuming from whatever the saved state already has.
pub async fn run_report(
    config: &Config,
    title: &str,
    kb_folder: &Path,
    requirements: Option<String>,
    progress: ProgressMode,
) -> Result<()> {
    let ws = workspace(config, title)?;
    let mut state = ws.load_or_new(config)?;
    if let Some(requirements) = requirements {
        if state.request.requirements != requirements {
            state.request.requirements = requirements;
            state = ReportState::new(state.request.clone());
        }
    }

    let kb = load_knowledge_base(kb_folder)?;
    let provider = query_embedder(config, &kb)?;
    let client = HttpLlmClient::new(&config.llm)?;
    let asm = ReportAssembler::new(&client).with_retriever(Retriever::new(provider.as_ref(), &kb));

    if state.stage == ReportStage::Empty {
        let mut sink = progress.sink("outline");
        state = ws.settle(asm.draft_outline(&state, sink.as_mut()).await, "outline")?;
    }
    if state.stage == ReportStage::OutlineDrafted {
        let mut sink = progress.sink("parse");
        state = ws.settle(asm.parse_outline(&state, sink.as_mut()).await, "parse")?;
    }
    if let Some(ParsedScheme::Unparsed { reason, .. }) = &state.scheme {
        print_scheme(&ws, &state);
        return Err(ReportError::SchemeUnparsed(reason.clone()))
            .with_context(|| format!("report {}: run stopped", ws.title));
    }
    for name in state.missing_paragraphs() {
        let mut sink = progress.sink(&format!("paragraph {}", name));
        let result = asm.generate_paragraph(&state, &name, sink.as_mut()).await;
        state = ws.settle(result, &format!("paragraph '{}'", name))?;
    }
    if matches!(
        state.stage,
        ReportStage::OutlineParsed | ReportStage::ParagraphsPending { .. }
    ) {
        state = ws.settle(compile(&state), "compile")?;
    }
    while state.stage != ReportStage::Optimized {
        let mut sink = progress.sink("optimize");
        let result = asm.optimize_next_window(&state, sink.as_mut()).await;
        state = ws.settle(result, "optimize")?;
    }

    println!("{}\n", state.request.title);
    println!("{}", state.final_report().unwrap_or_default());
    Ok(())
}

/// Print where a report stands.
pub fn run_status(config: &Config, title: &str) -> Result<()> {
    let ws = workspace(config, title)?;
    let state = ws.require()?;

    println!("report {}", ws.title);
    println!("  stage: {}", state.stage);
    if let Some(outline) = &state.outline {
        println!("  outline: {} chars", outline.chars().count());
    }
    match &state.scheme {
        Some(ParsedScheme::Parsed { placeholders, .. }) => {
            println!(
                "  paragraphs: {} / {}",
                placeholders.len() - state.missing_paragraphs().len(),
                placeholders.len()
            );
            for name in placeholders {
                let mark = if state.paragraphs.contains_key(name) { "x" } else { " " };
                println!("    [{}] {}", mark, name);
            }
        }
        Some(ParsedScheme::Unparsed { reason, .. }) => {
            println!("  scheme: unparsed ({})", reason);
        }
        None => {}
    }
    if let Some(draft) = &state.draft {
        let total = window_count(draft, state.request.window_chars);
        println!("  draft: {} chars", draft.chars().count());
        println!("  optimized: {} / {} windows", state.optimized.len(), total);
    }
    println!("  state: {}", ws.state_path().display());
    Ok(())
}
