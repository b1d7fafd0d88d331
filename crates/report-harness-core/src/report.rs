//! Report assembly state machine.
//!
//! A report moves strictly forward through [`ReportStage`]:
//!
//! ```text
//! Empty ─▶ OutlineDrafted ─▶ OutlineParsed ─▶ ParagraphsPending { remaining }
//!       ─▶ DraftCompiled ─▶ Optimizing { next_window, total } ─▶ Optimized
//! ```
//!
//! Every step borrows a [`ReportState`] and returns a new one, so a step
//! that fails (interrupted stream, missing paragraph) leaves the caller's
//! state as it was. Re-running a step replaces its result and clears
//! everything downstream of it.
//!
//! Each step makes at most one LLM call: outline drafting and paragraph
//! writing use the client's default model, scheme parsing and window
//! optimization use [`ReportRequest::long_model`] when set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compile::{compile_draft, window_at, window_count, DEFAULT_WINDOW_CHARS};
use crate::error::ReportError;
use crate::llm::{stream_text, FragmentSink, LlmClient};
use crate::parse::{annotate_outline, extract_paragraph, parse_scheme, ParsedScheme};
use crate::prompts;
use crate::retrieve::Retriever;

/// Where a report is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ReportStage {
    Empty,
    OutlineDrafted,
    OutlineParsed,
    ParagraphsPending { remaining: usize },
    DraftCompiled,
    Optimizing { next_window: usize, total: usize },
    Optimized,
}

impl ReportStage {
    fn rank(&self) -> u8 {
        match self {
            ReportStage::Empty => 0,
            ReportStage::OutlineDrafted => 1,
            ReportStage::OutlineParsed => 2,
            ReportStage::ParagraphsPending { .. } => 3,
            ReportStage::DraftCompiled => 4,
            ReportStage::Optimizing { .. } => 5,
            ReportStage::Optimized => 6,
        }
    }
}

impl fmt::Display for ReportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStage::Empty => write!(f, "empty"),
            ReportStage::OutlineDrafted => write!(f, "outline drafted"),
            ReportStage::OutlineParsed => write!(f, "outline parsed"),
            ReportStage::ParagraphsPending { remaining } => {
                write!(f, "paragraphs pending ({} remaining)", remaining)
            }
            ReportStage::DraftCompiled => write!(f, "draft compiled"),
            ReportStage::Optimizing { next_window, total } => {
                write!(f, "optimizing (window {}/{})", next_window + 1, total)
            }
            ReportStage::Optimized => write!(f, "optimized"),
        }
    }
}

/// What to write. Fixed for the lifetime of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub title: String,
    /// Subject area the model writes as an expert in.
    pub domain: String,
    /// Free-text requirements for the outline and the final pass.
    pub requirements: String,
    pub temperature: f32,
    /// Chunks retrieved per paragraph.
    pub top_k: usize,
    /// Optimization window size in characters.
    pub window_chars: usize,
    /// Model for scheme parsing and optimization.
    pub long_model: Option<String>,
}

impl ReportRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            domain: String::new(),
            requirements: String::new(),
            temperature: 0.8,
            top_k: 5,
            window_chars: DEFAULT_WINDOW_CHARS,
            long_model: None,
        }
    }
}

/// Everything produced so far for one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    pub request: ReportRequest,
    pub stage: ReportStage,
    pub outline: Option<String>,
    pub scheme: Option<ParsedScheme>,
    /// Paragraph text keyed by placeholder name.
    pub paragraphs: BTreeMap<String, String>,
    pub draft: Option<String>,
    /// One entry per optimized window, in order.
    pub optimized: Vec<String>,
}

impl ReportState {
    pub fn new(request: ReportRequest) -> Self {
        Self {
            request,
            stage: ReportStage::Empty,
            outline: None,
            scheme: None,
            paragraphs: BTreeMap::new(),
            draft: None,
            optimized: Vec::new(),
        }
    }

    /// Placeholder names in generation order; empty before parsing.
    pub fn placeholders(&self) -> &[String] {
        self.scheme.as_ref().map(|s| s.placeholders()).unwrap_or(&[])
    }

    /// Placeholders without a paragraph, in generation order.
    pub fn missing_paragraphs(&self) -> Vec<String> {
        self.placeholders()
            .iter()
            .filter(|n| !self.paragraphs.contains_key(*n))
            .cloned()
            .collect()
    }

    /// Optimized windows joined so far.
    pub fn optimized_text(&self) -> String {
        self.optimized.concat()
    }

    /// The finished report, once every window is optimized.
    pub fn final_report(&self) -> Option<String> {
        match self.stage {
            ReportStage::Optimized => Some(self.optimized_text()),
            _ => None,
        }
    }

    /// Replace the outline by hand. Clears everything downstream.
    pub fn with_outline(&self, outline: impl Into<String>) -> ReportState {
        let mut next = self.clone();
        next.outline = Some(outline.into());
        next.scheme = None;
        next.paragraphs.clear();
        next.draft = None;
        next.optimized.clear();
        next.stage = ReportStage::OutlineDrafted;
        next
    }

    /// Set one paragraph by hand.
    pub fn with_paragraph(
        &self,
        name: &str,
        text: impl Into<String>,
    ) -> Result<ReportState, ReportError> {
        self.require("with_paragraph", "outline parsed or later", 2)?;
        self.require_placeholder(name)?;
        let mut next = self.clone();
        next.paragraphs.insert(name.to_string(), text.into());
        next.after_paragraph_change();
        Ok(next)
    }

    fn require(&self, step: &'static str, expected: &'static str, min_rank: u8) -> Result<(), ReportError> {
        if self.stage.rank() < min_rank {
            return Err(ReportError::InvalidStage {
                step,
                expected,
                found: self.stage.to_string(),
            });
        }
        Ok(())
    }

    fn parsed_scheme(&self) -> Result<(&str, &[String]), ReportError> {
        match &self.scheme {
            Some(ParsedScheme::Parsed {
                template,
                placeholders,
            }) => Ok((template.as_str(), placeholders.as_slice())),
            Some(ParsedScheme::Unparsed { reason, .. }) => {
                Err(ReportError::SchemeUnparsed(reason.clone()))
            }
            None => Err(ReportError::InvalidStage {
                step: "parsed_scheme",
                expected: "outline parsed",
                found: self.stage.to_string(),
            }),
        }
    }

    fn require_placeholder(&self, name: &str) -> Result<(), ReportError> {
        let (_, placeholders) = self.parsed_scheme()?;
        if !placeholders.iter().any(|p| p == name) {
            return Err(ReportError::UnknownPlaceholder(name.to_string()));
        }
        Ok(())
    }

    fn after_paragraph_change(&mut self) {
        self.draft = None;
        self.optimized.clear();
        self.stage = ReportStage::ParagraphsPending {
            remaining: self.missing_paragraphs().len(),
        };
    }

    fn outline_text(&self) -> &str {
        self.outline.as_deref().unwrap_or("")
    }
}

/// Drives a [`ReportState`] through its stages.
pub struct ReportAssembler<'a> {
    llm: &'a dyn LlmClient,
    retriever: Option<Retriever<'a>>,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self {
            llm,
            retriever: None,
        }
    }

    /// Attach the knowledge base paragraphs are grounded on.
    pub fn with_retriever(mut self, retriever: Retriever<'a>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Draft an outline. Allowed at any stage; clears everything downstream.
    pub async fn draft_outline(
        &self,
        state: &ReportState,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        let req = &state.request;
        let chat = prompts::outline_request(&req.domain, &req.requirements, &req.title, req.temperature);
        let outline = stream_text(self.llm, &chat, sink).await?;
        info!(title = %req.title, chars = outline.chars().count(), "outline drafted");
        Ok(state.with_outline(outline.trim().to_string()))
    }

    /// Parse the outline with the long model.
    ///
    /// An unparseable response still moves the report to `OutlineParsed`;
    /// the scheme is then [`ParsedScheme::Unparsed`] and has no placeholders.
    pub async fn parse_outline(
        &self,
        state: &ReportState,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        state.require("parse_outline", "outline drafted or later", 1)?;
        let req = &state.request;
        let chat = prompts::scheme_parse_request(&req.domain, state.outline_text(), req.temperature)
            .with_model(req.long_model.clone());
        let response = stream_text(self.llm, &chat, sink).await?;
        let scheme = parse_scheme(&response);
        info!(
            parsed = scheme.is_parsed(),
            placeholders = scheme.placeholders().len(),
            "outline parsed"
        );
        Ok(with_scheme(state, scheme))
    }

    /// Annotate the outline with local rules instead of the LLM.
    pub fn parse_outline_locally(&self, state: &ReportState) -> Result<ReportState, ReportError> {
        parse_outline_locally(state)
    }

    /// Write the paragraph for `name`, replacing any earlier one.
    pub async fn generate_paragraph(
        &self,
        state: &ReportState,
        name: &str,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        state.require("generate_paragraph", "outline parsed or later", 2)?;
        state.require_placeholder(name)?;
        let retriever = self.retriever.as_ref().ok_or(ReportError::NoKnowledgeBase)?;
        let (template, _) = state.parsed_scheme()?;

        let req = &state.request;
        let retrieval = retriever.retrieve(name, req.top_k).await?;
        debug!(name, chunks = retrieval.len(), "retrieved context for paragraph");

        let chat = prompts::paragraph_request(
            &req.domain,
            &req.title,
            template,
            name,
            &retrieval.joined(),
            req.temperature,
        );
        let response = stream_text(self.llm, &chat, sink).await?;
        let paragraph = extract_paragraph(&response);

        let mut next = state.clone();
        next.paragraphs.insert(name.to_string(), paragraph);
        next.after_paragraph_change();
        info!(name, stage = %next.stage, "paragraph generated");
        Ok(next)
    }

    /// Generate every missing paragraph in placeholder order.
    pub async fn generate_paragraphs(
        &self,
        state: &ReportState,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        state.require("generate_paragraphs", "outline parsed or later", 2)?;
        state.parsed_scheme()?;
        let mut current = state.clone();
        for name in state.missing_paragraphs() {
            current = self.generate_paragraph(&current, &name, sink).await?;
        }
        if current.stage == ReportStage::OutlineParsed {
            current.after_paragraph_change();
        }
        Ok(current)
    }

    /// Substitute paragraphs into the template.
    pub fn compile(&self, state: &ReportState) -> Result<ReportState, ReportError> {
        compile(state)
    }

    /// Optimize the next window of the draft.
    pub async fn optimize_next_window(
        &self,
        state: &ReportState,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        let next_window = match state.stage {
            ReportStage::DraftCompiled => 0,
            ReportStage::Optimizing { next_window, .. } => next_window,
            _ => {
                return Err(ReportError::InvalidStage {
                    step: "optimize_next_window",
                    expected: "draft compiled or optimizing",
                    found: state.stage.to_string(),
                })
            }
        };

        let req = &state.request;
        let draft = state.draft.as_deref().unwrap_or("");
        let total = window_count(draft, req.window_chars);
        let mut next = state.clone();
        if next_window == 0 {
            next.optimized.clear();
        }

        let Some(window) = window_at(draft, req.window_chars, next_window) else {
            next.stage = ReportStage::Optimized;
            return Ok(next);
        };

        let chat = prompts::optimize_request(
            &req.domain,
            &req.title,
            &req.requirements,
            draft,
            &next.optimized_text(),
            &window,
            req.temperature,
        )
        .with_model(req.long_model.clone());
        let optimized = stream_text(self.llm, &chat, sink).await?;
        next.optimized.push(optimized);

        let done = next_window + 1;
        next.stage = if done >= total {
            ReportStage::Optimized
        } else {
            ReportStage::Optimizing {
                next_window: done,
                total,
            }
        };
        info!(window = done, total, "draft window optimized");
        Ok(next)
    }

    /// Optimize every remaining window.
    pub async fn optimize(
        &self,
        state: &ReportState,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        let mut current = self.optimize_next_window(state, sink).await?;
        while current.stage != ReportStage::Optimized {
            current = self.optimize_next_window(&current, sink).await?;
        }
        Ok(current)
    }

    /// The whole pipeline from a fresh state.
    ///
    /// Stops with [`ReportError::SchemeUnparsed`] when the outline cannot be
    /// parsed, since there would be nothing to generate.
    pub async fn run(
        &self,
        state: &ReportState,
        sink: &mut dyn FragmentSink,
    ) -> Result<ReportState, ReportError> {
        let drafted = self.draft_outline(state, sink).await?;
        let parsed = self.parse_outline(&drafted, sink).await?;
        if let Some(ParsedScheme::Unparsed { reason, .. }) = &parsed.scheme {
            return Err(ReportError::SchemeUnparsed(reason.clone()));
        }
        let written = self.generate_paragraphs(&parsed, sink).await?;
        let compiled = self.compile(&written)?;
        self.optimize(&compiled, sink).await
    }
}

fn with_scheme(state: &ReportState, scheme: ParsedScheme) -> ReportState {
    let mut next = state.clone();
    next.scheme = Some(scheme);
    next.paragraphs.clear();
    next.draft = None;
    next.optimized.clear();
    next.stage = ReportStage::OutlineParsed;
    next
}

/// Rule-based parse of the outline, no LLM call.
pub fn parse_outline_locally(state: &ReportState) -> Result<ReportState, ReportError> {
    state.require("parse_outline_locally", "outline drafted or later", 1)?;
    let scheme = annotate_outline(state.outline_text());
    info!(
        parsed = scheme.is_parsed(),
        placeholders = scheme.placeholders().len(),
        "outline parsed locally"
    );
    Ok(with_scheme(state, scheme))
}

/// Compile the draft from the parsed template and the paragraphs.
pub fn compile(state: &ReportState) -> Result<ReportState, ReportError> {
    state.require("compile", "outline parsed or later", 2)?;
    let (template, _) = state.parsed_scheme()?;
    let draft = compile_draft(template, &state.paragraphs)?;
    let mut next = state.clone();
    info!(chars = draft.chars().count(), "draft compiled");
    next.draft = Some(draft);
    next.optimized.clear();
    next.stage = ReportStage::DraftCompiled;
    Ok(next)
}
