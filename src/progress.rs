//! Progress reporting for long-running commands.
//!
//! Two kinds of progress are reported, both on **stderr** so stdout stays
//! parseable for scripts:
//! - LLM output as it streams in, through a [`FragmentSink`] per step.
//! - Knowledge-base build milestones ([`BuildEvent`]).

use std::io::Write;

use report_harness_core::llm::FragmentSink;

/// A knowledge-base build milestone.
#[derive(Clone, Debug)]
pub enum BuildEvent {
    Loaded { documents: usize },
    Chunked { chunks: usize },
    Embedding { n: usize, total: usize },
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Sink that renders the streamed output of `step`.
    pub fn sink(&self, step: &str) -> Box<dyn FragmentSink> {
        match self {
            ProgressMode::Off => Box::new(report_harness_core::llm::NullSink),
            ProgressMode::Human => Box::new(EchoSink::new(step)),
            ProgressMode::Json => Box::new(JsonSink {
                step: step.to_string(),
                fragments: 0,
            }),
        }
    }

    pub fn report(&self, kb: &str, event: BuildEvent) {
        match self {
            ProgressMode::Off => {}
            ProgressMode::Human => {
                let line = match event {
                    BuildEvent::Loaded { documents } => {
                        format!("kb {}  loaded {} documents\n", kb, format_number(documents))
                    }
                    BuildEvent::Chunked { chunks } => {
                        format!("kb {}  {} chunks\n", kb, format_number(chunks))
                    }
                    BuildEvent::Embedding { n, total } => format!(
                        "kb {}  embedding  {} / {} chunks\n",
                        kb,
                        format_number(n),
                        format_number(total)
                    ),
                };
                let mut err = std::io::stderr().lock();
                let _ = err.write_all(line.as_bytes());
                let _ = err.flush();
            }
            ProgressMode::Json => {
                let obj = match event {
                    BuildEvent::Loaded { documents } => serde_json::json!({
                        "event": "progress", "kb": kb, "phase": "loaded", "documents": documents
                    }),
                    BuildEvent::Chunked { chunks } => serde_json::json!({
                        "event": "progress", "kb": kb, "phase": "chunked", "chunks": chunks
                    }),
                    BuildEvent::Embedding { n, total } => serde_json::json!({
                        "event": "progress", "kb": kb, "phase": "embedding", "n": n, "total": total
                    }),
                };
                write_json_line(&obj);
            }
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}': use off, human or json", other)),
        }
    }
}

/// Echoes fragments to stderr as they arrive, under a `── step ──` header.
struct EchoSink {
    header: Option<String>,
}

impl EchoSink {
    fn new(step: &str) -> Self {
        Self {
            header: Some(format!("── {} ──\n", step)),
        }
    }
}

impl FragmentSink for EchoSink {
    fn on_fragment(&mut self, fragment: &str, _accumulated: &str) {
        let mut err = std::io::stderr().lock();
        if let Some(header) = self.header.take() {
            let _ = err.write_all(header.as_bytes());
        }
        let _ = err.write_all(fragment.as_bytes());
        let _ = err.flush();
    }
}

impl Drop for EchoSink {
    fn drop(&mut self) {
        if self.header.is_none() {
            let _ = std::io::stderr().lock().write_all(b"\n");
        }
    }
}

/// One JSON object per fragment: step, fragment count and characters so far.
struct JsonSink {
    step: String,
    fragments: usize,
}

impl FragmentSink for JsonSink {
    fn on_fragment(&mut self, _fragment: &str, accumulated: &str) {
        self.fragments += 1;
        write_json_line(&serde_json::json!({
            "event": "fragment",
            "step": self.step,
            "fragments": self.fragments,
            "chars": accumulated.chars().count(),
        }));
    }
}

fn write_json_line(obj: &serde_json::Value) {
    if let Ok(line) = serde_json::to_string(obj) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
        let _ = err.flush();
    }
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
