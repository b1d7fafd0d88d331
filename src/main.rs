//! # Report Harness CLI (`rh`)
//!
//! ## Usage
//!
//! ```bash
//! rh --config ./config/rh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rh kb build <folder>` | Chunk, embed and persist a folder of documents |
//! | `rh kb search <folder> "<query>"` | Show the nearest chunks |
//! | `rh kb ask <folder> "<question>"` | Answer from retrieved chunks |
//! | `rh report outline` | Draft a report outline |
//! | `rh report parse` | Turn the outline into a template |
//! | `rh report paragraphs` | Write paragraphs from the knowledge base |
//! | `rh report compile` | Fill the template into a draft |
//! | `rh report optimize` | Polish the draft window by window |
//! | `rh report run` | All report steps in one go |
//! | `rh report status` | Where a report stands |
//! | `rh report export` | Write the finished report as HTML |
//! | `rh doc clean <pdf>...` | Strip PDF artifacts with the LLM |
//! | `rh table extract <image>` | Image tables to CSV files |
//! | `rh table interpret <csv>` | Describe and analyse a table |
//!
//! Logging goes to stderr and is controlled with `RH_LOG`
//! (e.g. `RH_LOG=report_harness=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use report_harness::config;
use report_harness::progress::ProgressMode;
use report_harness::{doc_cmd, export, kb, report_cmd, tables};

/// Report Harness CLI: retrieval-grounded report writing with hosted LLMs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rh",
    about = "Report Harness: retrieval-grounded report writing with hosted LLMs",
    version,
    long_about = "Report Harness builds a knowledge base from a folder of documents and \
    assembles long reports step by step: outline, template, retrieved paragraphs, \
    compiled draft and a windowed optimization pass."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rh.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/rh.toml")]
    config: PathBuf,

    /// Progress output on stderr: off, human or json.
    ///
    /// Defaults to human when stderr is a terminal, otherwise off.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and query knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Assemble a report step by step.
    ///
    /// Reports are stored under `report.dir` as `<title>.*` files; every
    /// step saves its result, so steps can be re-run or resumed.
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Prepare source documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Extract and interpret tables.
    Table {
        #[command(subcommand)]
        action: TableAction,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Load, chunk and embed a folder.
    ///
    /// Writes `<folder>_chunks.json` and `<folder>_index.bin` next to the
    /// folder. Skipped when both already exist.
    Build {
        folder: PathBuf,

        /// Rebuild even if the knowledge base exists.
        #[arg(long)]
        force: bool,
    },

    /// Print the chunks nearest to a query.
    Search {
        folder: PathBuf,
        query: String,

        /// Number of chunks (defaults to `retrieval.top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer a question from the retrieved chunks.
    Ask {
        folder: PathBuf,
        question: String,

        /// Number of chunks (defaults to `retrieval.top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Draft the outline. Replaces any earlier outline and everything after it.
    Outline {
        #[arg(long)]
        title: String,

        /// What the report must cover.
        #[arg(long)]
        requirements: Option<String>,
    },

    /// Parse the (possibly hand-edited) outline into a template.
    Parse {
        #[arg(long)]
        title: String,

        /// Use the built-in `撰写内容包括：` rules instead of the LLM.
        #[arg(long)]
        local: bool,
    },

    /// Write paragraphs that are still missing.
    Paragraphs {
        #[arg(long)]
        title: String,

        /// Knowledge-base folder to retrieve from.
        #[arg(long)]
        kb: PathBuf,

        /// Write (or rewrite) only this placeholder.
        #[arg(long)]
        only: Option<String>,
    },

    /// Fill the template with the paragraphs.
    Compile {
        #[arg(long)]
        title: String,
    },

    /// Optimize the next window of the draft.
    Optimize {
        #[arg(long)]
        title: String,

        /// Optimize every remaining window.
        #[arg(long)]
        all: bool,
    },

    /// Run every remaining step and print the final report.
    Run {
        #[arg(long)]
        title: String,

        #[arg(long)]
        kb: PathBuf,

        #[arg(long)]
        requirements: Option<String>,
    },

    /// Show a report's stage and progress.
    Status {
        #[arg(long)]
        title: String,
    },

    /// Write the optimized report as a standalone HTML page.
    Export {
        #[arg(long)]
        title: String,

        /// Output file (defaults to `<title>.html` in `report.dir`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Export the compiled draft instead of the optimized report.
        #[arg(long)]
        draft: bool,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Remove page numbers, headers and footers from PDF text.
    Clean {
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// Directory for the cleaned `.txt` files.
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum TableAction {
    /// Extract the tables in an image to CSV files.
    Extract {
        image: PathBuf,

        /// Directory for the `<name>.csv` files.
        #[arg(long)]
        out: PathBuf,
    },

    /// Describe and analyse a CSV table.
    Interpret {
        csv: PathBuf,

        /// What the table is about.
        #[arg(long)]
        background: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let cfg = config::load_config_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Kb { action } => match action {
            KbAction::Build { folder, force } => {
                kb::run_kb_build(&cfg, &folder, force, progress).await?;
            }
            KbAction::Search { folder, query, k } => {
                kb::run_kb_search(&cfg, &folder, &query, k).await?;
            }
            KbAction::Ask { folder, question, k } => {
                kb::run_kb_ask(&cfg, &folder, &question, k, progress).await?;
            }
        },
        Commands::Report { action } => match action {
            ReportAction::Outline {
                title,
                requirements,
            } => {
                report_cmd::run_outline(&cfg, &title, requirements, progress).await?;
            }
            ReportAction::Parse { title, local } => {
                report_cmd::run_parse(&cfg, &title, local, progress).await?;
            }
            ReportAction::Paragraphs { title, kb, only } => {
                report_cmd::run_paragraphs(&cfg, &title, &kb, only, progress).await?;
            }
            ReportAction::Compile { title } => {
                report_cmd::run_compile(&cfg, &title)?;
            }
            ReportAction::Optimize { title, all } => {
                report_cmd::run_optimize(&cfg, &title, all, progress).await?;
            }
            ReportAction::Run {
                title,
                kb,
                requirements,
            } => {
                report_cmd::run_report(&cfg, &title, &kb, requirements, progress).await?;
            }
            ReportAction::Status { title } => {
                report_cmd::run_status(&cfg, &title)?;
            }
            ReportAction::Export {
                title,
                output,
                draft,
            } => {
                export::run_report_export(&cfg, &title, output.as_deref(), draft)?;
            }
        },
        Commands::Doc { action } => match action {
            DocAction::Clean { pdfs, out } => {
                doc_cmd::run_doc_clean(&cfg, &pdfs, &out, progress).await?;
            }
        },
        Commands::Table { action } => match action {
            TableAction::Extract { image, out } => {
                tables::run_table_extract(&cfg, &image, &out).await?;
            }
            TableAction::Interpret { csv, background } => {
                tables::run_table_interpret(&cfg, &csv, background, progress).await?;
            }
        },
    }

    Ok(())
}
